pub fn now_utc() -> time::OffsetDateTime {
    time::OffsetDateTime::now_utc()
}

pub fn unix_now() -> i64 {
    now_utc().unix_timestamp()
}

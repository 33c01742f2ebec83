/// GTFS tables replaced wholesale on every load, dependents first.
pub const GTFS_TABLES: &[&str] = &[
    "stop_times",
    "trips",
    "routes",
    "calendar_dates",
    "stops",
    "agency",
];

/// Table and index definitions, applied in order by `Store::migrate`.
pub const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS agency (
        agency_id TEXT PRIMARY KEY,
        agency_name TEXT NOT NULL,
        agency_url TEXT NOT NULL,
        agency_timezone TEXT NOT NULL,
        agency_lang TEXT,
        agency_phone TEXT,
        agency_fare_url TEXT,
        agency_email TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stops (
        stop_id TEXT PRIMARY KEY,
        stop_code TEXT,
        stop_name TEXT,
        stop_desc TEXT,
        stop_lat REAL,
        stop_lon REAL,
        zone_id TEXT,
        stop_url TEXT,
        location_type INTEGER,
        parent_station TEXT,
        stop_timezone TEXT,
        wheelchair_boarding INTEGER
    )
    "#,
    "CREATE INDEX IF NOT EXISTS stops_stop_code ON stops (stop_code)",
    r#"
    CREATE TABLE IF NOT EXISTS calendar_dates (
        service_id TEXT NOT NULL,
        date TEXT NOT NULL,
        exception_type INTEGER NOT NULL,
        PRIMARY KEY (service_id, date)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS routes (
        route_id TEXT PRIMARY KEY,
        agency_id TEXT,
        route_short_name TEXT,
        route_long_name TEXT,
        route_desc TEXT,
        route_type INTEGER NOT NULL,
        route_url TEXT,
        route_color TEXT,
        route_text_color TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS routes_short_name ON routes (route_short_name)",
    r#"
    CREATE TABLE IF NOT EXISTS trips (
        trip_id TEXT PRIMARY KEY,
        route_id TEXT NOT NULL REFERENCES routes (route_id) ON DELETE CASCADE,
        service_id TEXT NOT NULL,
        trip_headsign TEXT,
        trip_short_name TEXT,
        direction_id INTEGER,
        block_id TEXT,
        shape_id TEXT,
        wheelchair_accessible INTEGER,
        bikes_allowed INTEGER
    )
    "#,
    "CREATE INDEX IF NOT EXISTS trips_route_service ON trips (route_id, service_id)",
    // stop_id has no foreign key: stops are pruned by code independently of
    // the trips that visit them.
    r#"
    CREATE TABLE IF NOT EXISTS stop_times (
        trip_id TEXT NOT NULL REFERENCES trips (trip_id) ON DELETE CASCADE,
        arrival_time TEXT,
        departure_time TEXT,
        stop_id TEXT NOT NULL,
        stop_sequence INTEGER NOT NULL,
        stop_headsign TEXT,
        pickup_type INTEGER,
        drop_off_type INTEGER,
        shape_dist_traveled REAL,
        timepoint INTEGER,
        PRIMARY KEY (trip_id, stop_id, stop_sequence)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS stop_times_stop ON stop_times (stop_id)",
    r#"
    CREATE TABLE IF NOT EXISTS imports (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        imported_at TEXT NOT NULL,
        url TEXT NOT NULL,
        success INTEGER NOT NULL,
        error TEXT
    )
    "#,
];

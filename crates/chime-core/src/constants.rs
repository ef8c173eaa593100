/// Route component constants shared across crates
pub const API_ROUTE_COMPONENT: &str = "api";
pub const API_ROUTE_PREFIX: &str = const_str::concat!("/", API_ROUTE_COMPONENT);

pub const ALERTS_ROUTE_COMPONENT: &str = "alerts";
pub const ALERTS_ROUTE_PREFIX: &str =
    const_str::concat!(API_ROUTE_PREFIX, "/", ALERTS_ROUTE_COMPONENT);

pub const APPOINTMENTS_ROUTE_COMPONENT: &str = "appointments";
pub const APPOINTMENTS_ROUTE_PREFIX: &str =
    const_str::concat!(API_ROUTE_PREFIX, "/", APPOINTMENTS_ROUTE_COMPONENT);

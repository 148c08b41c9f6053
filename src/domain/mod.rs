pub mod coords;
pub mod flags;
pub mod mjd;
pub mod model;
pub mod ports;

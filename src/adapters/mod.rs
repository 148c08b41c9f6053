// Adapters: file formats and external services (ATLAS, TNS).

pub mod atlas;
pub mod control_coords;
pub mod lc_file;
pub mod report;
pub mod sninfo;
pub mod tns;

pub mod markets;
pub mod serve;

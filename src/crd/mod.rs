mod elasticsearch;

pub use elasticsearch::*;

pub mod logs;
pub mod scenery;
pub mod serve;
pub mod start;
pub mod status;
pub mod stop;

pub mod crawler;
pub mod engine;
pub mod graph;
pub mod shared;

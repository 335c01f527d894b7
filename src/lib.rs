pub mod db;
pub mod scoring;

pub mod schedule;
pub mod kernel;
pub mod rescore;

pub mod cluster;
pub mod pipeline;
pub mod store;

pub mod ingest;

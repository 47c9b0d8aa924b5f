mod common;
mod dedup;

//! Background tasks spawned once at server boot.

pub mod reaper;

#![doc = "folio-sync-core: incremental watermark-and-publish pipeline for portfolio media."]

//! This crate holds all pipeline logic for folio-sync: the store and media
//! handler contracts, their `rclone` / `ffmpeg` implementations, change
//! detection, publishing, orphan pruning and manifest regeneration.
//!
//! # Usage
//! The CLI crate builds a [`config::SyncConfig`], two [`rclone::RcloneStore`]s and
//! an [`ffmpeg::FfmpegHandler`], then calls [`synchronise::synchronise`].

pub mod config;
pub mod contract;
pub mod detect;
pub mod error;
pub mod exclude;
pub mod exec;
pub mod ffmpeg;
pub mod inventory;
pub mod manifest;
pub mod media;
pub mod prune;
pub mod publish;
pub mod rclone;
pub mod report;
pub mod synchronise;

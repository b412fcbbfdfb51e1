//! Asynchronous document-generation service: submit a template plus JSON
//! data, a worker renders it to PDF/DOCX/JSON, poll the job and download the
//! result.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;

//! Everything that talks to the authoritative progress backend.

mod backend;
mod client;
mod http;
mod memory;
mod wire;

pub use backend::{BearerToken, CredentialSource, ProgressBackend, StaticCredentials};
pub use client::ProgressSyncClient;
pub use http::{HttpProgressBackend, SyncConfig};
pub use memory::InMemoryBackend;
pub use wire::{ProgressPayload, QuizSubmission, SubmissionRecord};

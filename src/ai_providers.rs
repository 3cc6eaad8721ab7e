//! Clients for the hosted language-model services that play the examiner.
//! Backends implement [`crate::session::ExaminerModel`]; which one is wired
//! up is decided in the composition root.

pub mod openai;

pub use openai::ChatCompletionsClient;

//! Wire types for the two protocols gemgate speaks: the native Gemini REST
//! contract (contents, parts, candidates) and the OpenAI-compatible
//! chat/embeddings/images contract (messages, choices, deltas).
//!
//! Everything here is plain serde data. Absent optional fields are skipped on
//! serialization so outgoing JSON never carries nulls the upstream APIs would
//! reject.

pub mod gemini;
pub mod openai;
pub mod sse;

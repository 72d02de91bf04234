//! Concrete [`ClientWrapper`](crate::client_wrapper::ClientWrapper) implementations.
//!
//! Only an OpenAI compatible client ships; it also covers OpenRouter and self-hosted gateways
//! that speak the chat completions API.

pub mod common;

pub mod openai;

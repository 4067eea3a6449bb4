pub mod anthropic;
pub mod models;
pub mod openai;

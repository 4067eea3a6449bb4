//! Direction-pair converters. Module `a2b` transforms protocol `a` payloads
//! into protocol `b` payloads: requests flow client→upstream, responses and
//! stream events flow upstream→client, each in its module's own direction.

pub mod claude2gemini;
pub mod claude2openai;
pub mod gemini2claude;
pub mod gemini2openai;
pub mod openai2claude;
pub mod openai2gemini;

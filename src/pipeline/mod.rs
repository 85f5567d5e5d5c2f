//! Pipeline stages for paper analysis.
//!
//! ## Data Flow
//!
//! ```text
//! stored PDF ──▶ extract ──▶ postprocess ──▶ analyze ──▶ llm (×2)
//!               (pdfium)     (page text)    (prompts)   (JSON replies)
//! ```
//!
//! 1. [`extract`]     : per-page text and page images; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 2. [`pdfium`]      : locating and binding the pdfium library
//! 3. [`postprocess`] : deterministic cleanup of page text and model replies
//! 4. [`llm`]         : structured completions with bounded resubmission
//! 5. [`analyze`]     : summary + main table for one stored paper

pub mod analyze;
pub mod extract;
pub mod llm;
pub mod pdfium;
pub mod postprocess;

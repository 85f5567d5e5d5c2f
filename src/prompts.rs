//! Prompt templates for paper analysis.
//!
//! Every string sent to the model is built here so prompt changes never touch
//! the retry or parsing logic in [`crate::pipeline::llm`]. Callers can
//! override the system prompt via
//! [`crate::config::AnalyzerConfig::system_prompt`].

use crate::paper::{PaperContent, PaperMetadata};
use crate::pipeline::llm::ResponseShape;

/// Default system prompt for both analysis calls.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert reader of academic research papers.

Follow these rules precisely:

1. Base every statement on the paper text you are given. Do not invent results,
   numbers or citations.
2. Quote numbers, units and group names exactly as they appear in the paper.
3. Answer with a single JSON object and nothing else. Do NOT wrap it in code
   fences and do NOT add commentary before or after it."#;

/// Header shared by both prompts: title, abstract and the page-labelled text.
fn paper_block(content: &PaperContent) -> String {
    format!(
        "Title: {}\n\nAbstract: {}\n\n\
Pages with content in the following format:\n\
Page 1:\n<Page Content>\n\
Page 2:\n<Page Content>\n\
...\n\n\
Content of the paper:\n{}",
        content.title,
        content.abstract_text,
        content.page_labeled_text()
    )
}

/// Prompt asking for a ~250 word summary.
pub fn summary_prompt(content: &PaperContent) -> String {
    format!(
        "You are given an academic research paper as follows:\n\n{}\n\n\
Based on the content of the research paper, please generate a concise summary \
(around 250 words) focusing on the paper's objectives, methods, and key findings.",
        paper_block(content)
    )
}

/// Prompt asking for the main results table as CSV plus its description and footnotes.
pub fn table_prompt(content: &PaperContent) -> String {
    format!(
        "Given the following research paper:\n\n{}\n\n\
Identify the table that appears to be the main results table.\n\
Note: Include the complete table content including headers, rows, and any footnotes. \
Put the table itself in CSV form (first row = column headers) and use an empty string \
for footnotes when there are none.",
        paper_block(content)
    )
}

/// Header for requests that carry the pages as attached images.
fn page_images_block(metadata: &PaperMetadata, page_count: usize) -> String {
    format!(
        "Title: {}\n\nAbstract: {}\n\n\
The {page_count} attached images are the pages of the paper, in order.",
        metadata.title, metadata.abstract_text
    )
}

/// Summary prompt when the pages are attached as images.
pub fn page_images_summary_prompt(metadata: &PaperMetadata, page_count: usize) -> String {
    format!(
        "You are given an academic research paper.\n\n{}\n\n\
Based on the content of the research paper, please generate a concise summary \
(around 250 words) focusing on the paper's objectives, methods, and key findings.",
        page_images_block(metadata, page_count)
    )
}

/// Table prompt when the pages are attached as images.
pub fn page_images_table_prompt(metadata: &PaperMetadata, page_count: usize) -> String {
    format!(
        "Given the following research paper:\n\n{}\n\n\
Identify the table that appears to be the main results table and transcribe it \
completely, including headers, rows, and any footnotes. Put the table itself in CSV \
form (first row = column headers) and use an empty string for footnotes when there \
are none.",
        page_images_block(metadata, page_count)
    )
}

/// Output-format instruction appended to every structured request.
pub fn json_instruction(shape: &ResponseShape) -> String {
    format!(
        "Provide your response in JSON format matching exactly this structure:\n{}\n\n\
Your response must be valid JSON that can be parsed. Include only the JSON output, \
with exactly these keys and string values.",
        shape.template_json()
    )
}

/// Follow-up sent after a reply that failed to parse.
pub fn retry_instruction(shape: &ResponseShape, error: &str) -> String {
    format!(
        "Your previous response was invalid JSON ({error}).\n\
Respond again with ONLY a JSON object with exactly the keys [{}], every value a string. \
No code fences, no explanations.",
        shape.field_names().join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::llm::{SUMMARY_SHAPE, TABLE_SHAPE};

    fn content() -> PaperContent {
        PaperContent {
            title: "KRAS in pancreatic cancer".into(),
            abstract_text: "We studied KRAS.".into(),
            page_contents: vec!["Intro text".into(), "Table 2: results".into()],
        }
    }

    #[test]
    fn summary_prompt_embeds_everything() {
        let p = summary_prompt(&content());
        assert!(p.contains("Title: KRAS in pancreatic cancer"));
        assert!(p.contains("Abstract: We studied KRAS."));
        assert!(p.contains("Page 1:\nIntro text"));
        assert!(p.contains("Page 2:\nTable 2: results"));
        assert!(p.contains("250 words"));
    }

    #[test]
    fn table_prompt_mentions_footnotes() {
        let p = table_prompt(&content());
        assert!(p.contains("main results table"));
        assert!(p.contains("footnotes"));
    }

    #[test]
    fn page_image_prompts_name_the_attachments() {
        let meta = PaperMetadata {
            id: "1".into(),
            title: "KRAS in pancreatic cancer".into(),
            abstract_text: "We studied KRAS.".into(),
            url: "https://pubmed.ncbi.nlm.nih.gov/1/".into(),
        };
        let summary = page_images_summary_prompt(&meta, 7);
        assert!(summary.contains("Title: KRAS in pancreatic cancer"));
        assert!(summary.contains("7 attached images"));
        assert!(summary.contains("250 words"));
        assert!(page_images_table_prompt(&meta, 7).contains("main results table"));
    }

    #[test]
    fn json_instruction_lists_shape_fields() {
        let s = json_instruction(&TABLE_SHAPE);
        for field in ["table_description", "csv_content", "footnotes"] {
            assert!(s.contains(field), "missing {field}");
        }
    }

    #[test]
    fn retry_instruction_names_error_and_keys() {
        let s = retry_instruction(&SUMMARY_SHAPE, "expected value at line 1 column 1");
        assert!(s.contains("invalid JSON"));
        assert!(s.contains("line 1 column 1"));
        assert!(s.contains("[summary]"));
    }
}

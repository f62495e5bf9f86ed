//! Presentation strategies for agent output.
//!
//! The agent only calls into a [`Speaker`]; nothing it returns is consumed.
//! A streamed reply produces `speak_stream_start`, any number of `speak_chunk`
//! calls and one `speak_stream_end`. A complete reply produces a single
//! `speak_complete`.

use crate::miniagent::message::{Message, MessageChunk};
use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use std::io::Write;
use std::sync::Mutex;

pub trait Speaker: Send + Sync {
    fn speak_stream_start(&self, agent_name: &str);

    fn speak_chunk(&self, chunk: &MessageChunk);

    fn speak_stream_end(&self);

    fn speak_complete(&self, response: &Message, agent_name: &str);
}

/// Plain stdout rendering. Reasoning text is shown in brackets.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSpeaker;

impl Speaker for ConsoleSpeaker {
    fn speak_stream_start(&self, agent_name: &str) {
        print!("{}: ", agent_name);
        let _ = std::io::stdout().flush();
    }

    fn speak_chunk(&self, chunk: &MessageChunk) {
        if !chunk.reasoning_content.is_empty() {
            print!("{}", chunk.reasoning_content);
        }
        if !chunk.content.is_empty() {
            print!("{}", chunk.content);
        }
        let _ = std::io::stdout().flush();
    }

    fn speak_stream_end(&self) {
        println!();
    }

    fn speak_complete(&self, response: &Message, agent_name: &str) {
        if let Some(reasoning) = &response.reasoning_content {
            println!("[Thinking: {}]", reasoning);
        }
        let text = response.text();
        if !text.is_empty() {
            println!("{}: {}", agent_name, text);
        }
    }
}

const BLUE: &str = "\x1b[94m";
const GREEN: &str = "\x1b[92m";
const YELLOW: &str = "\x1b[93m";
const CYAN: &str = "\x1b[96m";
const BOLD: &str = "\x1b[1m";
const ITALIC: &str = "\x1b[3m";
const STRIKE: &str = "\x1b[9m";
const RESET: &str = "\x1b[0m";

/// ANSI colored stdout rendering: name in blue, content green, reasoning yellow.
#[derive(Debug, Default, Clone, Copy)]
pub struct ColorSpeaker;

impl Speaker for ColorSpeaker {
    fn speak_stream_start(&self, agent_name: &str) {
        print!("{}{}:{} ", BLUE, agent_name, RESET);
        let _ = std::io::stdout().flush();
    }

    fn speak_chunk(&self, chunk: &MessageChunk) {
        if !chunk.reasoning_content.is_empty() {
            print!("{}{}{}", YELLOW, chunk.reasoning_content, RESET);
        }
        if !chunk.content.is_empty() {
            print!("{}{}{}", GREEN, chunk.content, RESET);
        }
        let _ = std::io::stdout().flush();
    }

    fn speak_stream_end(&self) {
        println!();
    }

    fn speak_complete(&self, response: &Message, agent_name: &str) {
        if let Some(reasoning) = &response.reasoning_content {
            println!("{}[Thinking: {}]{}", YELLOW, reasoning, RESET);
        }
        let text = response.text();
        if !text.is_empty() {
            println!("{}{}:{} {}{}{}", BLUE, agent_name, RESET, GREEN, text, RESET);
        }
    }
}

/// Renders replies as terminal-formatted markdown.
///
/// Markdown cannot be laid out from partial text, so streamed chunks are
/// collected and the whole reply is rendered on `speak_stream_end`.
#[derive(Debug, Default)]
pub struct MarkdownSpeaker {
    pending: Mutex<Option<(String, String)>>,
}

impl MarkdownSpeaker {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, Option<(String, String)>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Speaker for MarkdownSpeaker {
    fn speak_stream_start(&self, agent_name: &str) {
        *self.pending() = Some((agent_name.to_string(), String::new()));
    }

    fn speak_chunk(&self, chunk: &MessageChunk) {
        if let Some((_, text)) = self.pending().as_mut() {
            text.push_str(&chunk.content);
        }
    }

    fn speak_stream_end(&self) {
        if let Some((agent_name, text)) = self.pending().take() {
            println!("{}## {}{}", BOLD, agent_name, RESET);
            println!("{}", render_markdown(&text));
        }
    }

    fn speak_complete(&self, response: &Message, agent_name: &str) {
        println!("{}## {}{}", BOLD, agent_name, RESET);
        if let Some(reasoning) = &response.reasoning_content {
            println!("{}> {}{}", ITALIC, reasoning, RESET);
        }
        println!("{}", render_markdown(&response.text()));
    }
}

/// Lay out markdown for an ANSI terminal. Emphasis becomes terminal styling,
/// lists get bullets or numbers and links keep their target in parentheses.
pub fn render_markdown(markdown: &str) -> String {
    let mut out = String::new();
    let mut lists: Vec<Option<u64>> = Vec::new();
    let mut links: Vec<String> = Vec::new();
    let mut in_code_block = false;

    let options = Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS;
    for event in Parser::new_ext(markdown, options) {
        match event {
            Event::Start(Tag::Heading { .. }) | Event::Start(Tag::Strong) => out.push_str(BOLD),
            Event::End(TagEnd::Heading(_)) => {
                out.push_str(RESET);
                out.push_str("\n\n");
            }
            Event::End(TagEnd::Paragraph) => {
                out.push_str(if lists.is_empty() { "\n\n" } else { "\n" });
            }
            Event::Start(Tag::Emphasis) => out.push_str(ITALIC),
            Event::Start(Tag::Strikethrough) => out.push_str(STRIKE),
            Event::End(TagEnd::Emphasis | TagEnd::Strong | TagEnd::Strikethrough) => {
                out.push_str(RESET)
            }
            Event::Start(Tag::BlockQuote(_)) => out.push_str("| "),
            Event::Start(Tag::CodeBlock(_)) => in_code_block = true,
            Event::End(TagEnd::CodeBlock) => {
                in_code_block = false;
                out.push('\n');
            }
            Event::Start(Tag::List(first)) => {
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
                lists.push(first);
            }
            Event::End(TagEnd::List(_)) => {
                lists.pop();
                if lists.is_empty() {
                    out.push('\n');
                }
            }
            Event::Start(Tag::Item) => {
                out.push_str(&"  ".repeat(lists.len().saturating_sub(1)));
                match lists.last_mut() {
                    Some(Some(number)) => {
                        out.push_str(&format!("{}. ", number));
                        *number += 1;
                    }
                    _ => out.push_str("• "),
                }
            }
            Event::End(TagEnd::Item) => {
                if !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Event::Start(Tag::Link { dest_url, .. }) => links.push(dest_url.to_string()),
            Event::End(TagEnd::Link) => {
                if let Some(url) = links.pop() {
                    out.push_str(&format!(" ({})", url));
                }
            }
            Event::Text(text) if in_code_block => {
                for line in text.lines() {
                    out.push_str(&format!("    {}{}{}\n", CYAN, line, RESET));
                }
            }
            Event::Text(text) | Event::Html(text) | Event::InlineHtml(text) => out.push_str(&text),
            Event::Code(code) => out.push_str(&format!("{}{}{}", CYAN, code, RESET)),
            Event::SoftBreak | Event::HardBreak => out.push('\n'),
            Event::Rule => out.push_str("────────\n\n"),
            Event::TaskListMarker(done) => out.push_str(if done { "[x] " } else { "[ ] " }),
            _ => {}
        }
    }

    out.trim_end().to_string()
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSpeaker;

impl Speaker for SilentSpeaker {
    fn speak_stream_start(&self, _agent_name: &str) {}

    fn speak_chunk(&self, _chunk: &MessageChunk) {}

    fn speak_stream_end(&self) {}

    fn speak_complete(&self, _response: &Message, _agent_name: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_markdown_styles_inline_text() {
        let out = render_markdown("# Plan\n\nUse **bold** and `cargo`.");
        assert!(out.starts_with(&format!("{}Plan{}", BOLD, RESET)));
        assert!(out.contains(&format!("{}bold{}", BOLD, RESET)));
        assert!(out.contains(&format!("{}cargo{}", CYAN, RESET)));
        assert!(!out.contains("**"));
        assert!(!out.contains('#'));
    }

    #[test]
    fn test_render_markdown_lists_and_links() {
        let out = render_markdown("- one\n- two\n\n1. first\n2. second\n\nSee [docs](https://docs.rs).");
        assert!(out.contains("• one\n• two"));
        assert!(out.contains("1. first\n2. second"));
        assert!(out.contains("docs (https://docs.rs)"));
    }

    #[test]
    fn test_render_markdown_indents_code_blocks() {
        let out = render_markdown("```\nlet x = 1;\n```");
        assert_eq!(out, format!("    {}let x = 1;{}", CYAN, RESET));
    }

    #[test]
    fn test_markdown_speaker_buffers_stream() {
        let speaker = MarkdownSpeaker::new();
        speaker.speak_chunk(&MessageChunk::text("ignored"));
        assert!(speaker.pending().is_none());

        speaker.speak_stream_start("Alice");
        speaker.speak_chunk(&MessageChunk::text("**Hi"));
        speaker.speak_chunk(&MessageChunk::text("**"));
        assert_eq!(
            speaker.pending().as_ref().map(|(name, text)| (name.as_str(), text.as_str())),
            Some(("Alice", "**Hi**"))
        );
        speaker.speak_stream_end();
        assert!(speaker.pending().is_none());
    }
}

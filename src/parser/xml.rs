//! Tool-body XML parsing (§4.1, third stage).
//!
//! Takes the raw string buffered by [`super::tool_call::ToolCallExtractor`]
//! between `<tool>` and `</tool>` and turns it into a [`ToolCall`]. The body
//! is not itself well-formed XML (it can have multiple top-level siblings:
//! `<server_name>`, `<tool_name>`, `<arguments>`), so it's wrapped in a
//! synthetic `<root>` element before handing it to `quick_xml`.
//!
//! Two fallbacks exist for malformed but plausible bodies:
//! - a leaf element containing a `<![CDATA[...]]>` span never goes through
//!   [`Scalar::infer`] — it's always `Scalar::Str`, verbatim.
//! - if the first parse attempt fails, bare `&` characters not already
//!   part of a recognized entity or numeric reference are rewritten to
//!   `&amp;` and parsing is retried exactly once. If the retry also fails,
//!   the original error is what's surfaced (the retry is a silent repair
//!   attempt, not a different failure mode).

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{Error, Result};
use crate::types::{ArgNode, Scalar, ToolCall};

struct Frame {
    name: String,
    children: Vec<(String, ArgNode)>,
    text: String,
    has_cdata: bool,
    has_child: bool,
}

/// Parse a buffered tool-call body into a [`ToolCall`].
pub fn parse_tool_call(body: &str) -> Result<ToolCall> {
    let wrapped = format!("<root>{body}</root>");
    let root = match build_tree(&wrapped) {
        Ok(node) => node,
        Err(first_err) => {
            let escaped = escape_bare_ampersands(body);
            let retried = format!("<root>{escaped}</root>");
            build_tree(&retried).map_err(|_| first_err)?
        }
    };
    to_tool_call(root)
}

fn to_tool_call(root: ArgNode) -> Result<ToolCall> {
    let server_name = root
        .field("server_name")
        .map(|n| n.as_display_string())
        .unwrap_or_default();
    let tool_name = root
        .field("tool_name")
        .map(|n| n.as_display_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::parse_failure("tool call is missing <tool_name>"))?;
    let arguments = root
        .field("arguments")
        .cloned()
        .unwrap_or_else(|| ArgNode::Record(Vec::new()));
    Ok(ToolCall {
        server_name,
        tool_name,
        arguments,
    })
}

fn build_tree(xml: &str) -> Result<ArgNode> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text = true;

    let mut stack: Vec<Frame> = Vec::new();
    let mut result: Option<ArgNode> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                stack.push(Frame {
                    name,
                    children: Vec::new(),
                    text: String::new(),
                    has_cdata: false,
                    has_child: false,
                });
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                push_child(
                    &mut stack,
                    &mut result,
                    name,
                    ArgNode::Scalar(Scalar::Str(String::new())),
                );
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| Error::parse_failure(err.to_string()))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                let bytes = e.into_inner();
                let text = String::from_utf8_lossy(&bytes).into_owned();
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                    top.has_cdata = true;
                }
            }
            Ok(Event::End(_)) => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| Error::parse_failure("unbalanced closing tag in tool body"))?;
                let node = frame_to_node(frame);
                match stack.last_mut() {
                    Some(parent) => {
                        push_child_into(parent, node.0, node.1);
                    }
                    None => result = Some(node.1),
                }
            }
            Ok(_) => {}
            Err(err) => return Err(Error::parse_failure(err.to_string())),
        }
    }

    result.ok_or_else(|| Error::parse_failure("tool call body was empty"))
}

fn frame_to_node(frame: Frame) -> (String, ArgNode) {
    let node = if frame.has_child {
        ArgNode::Record(group_children(frame.children))
    } else if frame.has_cdata {
        ArgNode::Scalar(Scalar::literal(frame.text))
    } else {
        ArgNode::Scalar(Scalar::infer(frame.text.trim()))
    };
    (frame.name, node)
}

fn push_child_into(parent: &mut Frame, name: String, node: ArgNode) {
    parent.children.push((name, node));
    parent.has_child = true;
}

fn push_child(stack: &mut [Frame], result: &mut Option<ArgNode>, name: String, node: ArgNode) {
    if let Some(parent) = stack.last_mut() {
        push_child_into(parent, name, node);
    } else {
        *result = Some(node);
    }
}

/// Group same-named siblings into a `List`, preserving first-seen order for
/// distinct names (§4.1: "repeated sibling tags group into List; single
/// tags become direct Record fields").
fn group_children(children: Vec<(String, ArgNode)>) -> Vec<(String, ArgNode)> {
    use std::collections::HashMap;

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<ArgNode>> = HashMap::new();
    for (name, node) in children {
        groups
            .entry(name.clone())
            .or_insert_with(|| {
                order.push(name.clone());
                Vec::new()
            })
            .push(node);
    }
    order
        .into_iter()
        .map(|name| {
            let mut nodes = groups.remove(&name).expect("name recorded in order");
            if nodes.len() == 1 {
                (name, nodes.pop().expect("len checked"))
            } else {
                (name, ArgNode::List(nodes))
            }
        })
        .collect()
}

const NAMED_ENTITIES: &[&str] = &["amp;", "lt;", "gt;", "quot;", "apos;"];

/// `true` if the text immediately after a just-seen `&` forms a recognized
/// entity or numeric character reference (decimal or hex), meaning that `&`
/// should be left alone rather than escaped.
fn is_recognized_entity(rest: &str) -> bool {
    if NAMED_ENTITIES.iter().any(|e| rest.starts_with(e)) {
        return true;
    }
    let Some(after_hash) = rest.strip_prefix('#') else {
        return false;
    };
    let (digits, is_hex) = match after_hash.strip_prefix(['x', 'X']) {
        Some(hex) => (hex, true),
        None => (after_hash, false),
    };
    let Some(end) = digits.find(';') else {
        return false;
    };
    let digit_part = &digits[..end];
    if digit_part.is_empty() {
        return false;
    }
    if is_hex {
        digit_part.chars().all(|c| c.is_ascii_hexdigit())
    } else {
        digit_part.chars().all(|c| c.is_ascii_digit())
    }
}

/// Rewrite every `&` not already part of a recognized entity/numeric
/// reference to `&amp;`.
fn escape_bare_ampersands(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for (idx, ch) in input.char_indices() {
        if ch != '&' {
            out.push(ch);
            continue;
        }
        let rest = &input[idx + ch.len_utf8()..];
        if is_recognized_entity(rest) {
            out.push('&');
        } else {
            out.push_str("&amp;");
        }
    }
    out
}

//! Structural clause segmentation.
//!
//! Splits contract text on paragraph breaks and numbered markers, never on
//! sentence punctuation alone. Where a boundary is ambiguous the segmenter
//! keeps text together: a heading joins the clause it introduces, and a
//! paragraph that continues an unfinished sentence joins its predecessor.
//!
//! Clause spans partition the raw text: the first starts at 0, each starts
//! where the previous ends, and the last ends at `raw_text.len()`.

use tracing::debug;

use crate::contract::{Clause, Contract, TextSpan};
use crate::error::SegmentationError;
use crate::numbering::{ends_sentence, is_heading_line, parse_marker};

/// A run of lines opened by a paragraph break or a marker.
struct Block {
    start: usize,
    end: usize,
    marker: Option<String>,
}

/// Adjacent blocks merged into one clause.
struct Group {
    start: usize,
    end: usize,
    heading: Option<String>,
    /// Nothing but headings so far; the next block always joins.
    heading_only: bool,
}

/// Segment a contract into ordered clauses.
pub fn segment(contract: &Contract) -> Result<Vec<Clause>, SegmentationError> {
    let text = contract.raw_text();
    if text.trim().is_empty() {
        return Err(SegmentationError::Empty(contract.id().to_string()));
    }

    let blocks = split_blocks(text);
    let groups = merge_blocks(text, blocks);

    let clauses: Vec<Clause> = groups
        .into_iter()
        .enumerate()
        .map(|(ordinal, g)| {
            Clause::from_span(contract, ordinal, TextSpan::new(g.start, g.end), g.heading)
        })
        .collect();

    debug!(contract = %contract.id(), clauses = clauses.len(), "segmented contract");
    Ok(clauses)
}

fn split_blocks(text: &str) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::new();
    let mut offset = 0;
    let mut after_blank = false;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        if line.trim().is_empty() {
            after_blank = true;
            continue;
        }

        let marker = parse_marker(line).map(|m| m.label);
        if blocks.is_empty() {
            // Leading whitespace belongs to the first clause.
            blocks.push(Block {
                start: 0,
                end: 0,
                marker,
            });
        } else if after_blank || marker.is_some() {
            if let Some(last) = blocks.last_mut() {
                last.end = line_start;
            }
            blocks.push(Block {
                start: line_start,
                end: 0,
                marker,
            });
        }
        after_blank = false;
    }

    if let Some(last) = blocks.last_mut() {
        last.end = text.len();
    }
    blocks
}

fn merge_blocks(text: &str, blocks: Vec<Block>) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::with_capacity(blocks.len());

    for block in blocks {
        let content = text[block.start..block.end].trim();
        let single_line = !content.contains('\n');
        let is_heading = single_line && is_heading_line(content);

        let join = match groups.last() {
            None => false,
            Some(prev) if prev.heading_only => true,
            Some(prev) => {
                block.marker.is_none() && !ends_sentence(&text[prev.start..prev.end])
            }
        };

        if join && let Some(prev) = groups.last_mut() {
            prev.end = block.end;
            if prev.heading_only {
                if block.marker.is_some() {
                    prev.heading = block.marker;
                }
                prev.heading_only = is_heading;
            }
            continue;
        }

        groups.push(Group {
            start: block.start,
            end: block.end,
            heading: block.marker,
            heading_only: is_heading,
        });
    }

    // A trailing heading with nothing after it joins the clause before it.
    if groups.len() > 1 && groups.last().is_some_and(|g| g.heading_only)
        && let Some(tail) = groups.pop()
        && let Some(prev) = groups.last_mut()
    {
        prev.end = tail.end;
    }

    groups
}

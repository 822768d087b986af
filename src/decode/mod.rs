//! Two-line ID decoding from character glyph detections
//!
//! Stamped ID plates carry exactly two printed rows. A glyph is assigned to a
//! row by comparing its y coordinate against the mean y of all glyphs, then
//! rows are read left to right and concatenated top row first. The mean-split
//! is only correct when the rows are well separated relative to character
//! height, which camera framing has to guarantee.

use crate::detection::DetectionBox;
use crate::error::InspectError;

/// Decode result for an ID plate with no readable glyphs.
pub const NO_READ: &str = "NoRead";

/// Character table of the glyph detector, class ids 0..=22.
pub fn glyph_char(class_id: u32) -> Option<char> {
    let ch = match class_id {
        0 => '1',
        1 => '2',
        2 => '3',
        3 => '4',
        4 => '5',
        5 => '6',
        6 => '7',
        7 => '8',
        8 => '9',
        9 => '0',
        10 => 'A',
        11 => 'E',
        12 => 'F',
        13 => 'H',
        14 => 'J',
        15 => 'K',
        16 => 'P',
        17 => 'X',
        18 => 'Y',
        19 => 'L',
        20 => 'B',
        21 => 'T',
        22 => 'R',
        _ => return None,
    };
    Some(ch)
}

/// Order glyph detections into the printed two-row ID string.
///
/// Returns [`NO_READ`] when no glyphs were detected. Glyphs sitting exactly
/// on the mean y belong to neither row and are dropped; this matches the
/// deployed reader and is kept deliberately. An unmapped class id is a fatal
/// configuration error, not a per-image condition.
pub fn decode_two_line(boxes: &[DetectionBox]) -> Result<String, InspectError> {
    let glyphs: Vec<DetectionBox> = boxes
        .iter()
        .filter(|b| b.w > 0 || b.h > 0)
        .copied()
        .collect();

    if glyphs.is_empty() {
        return Ok(NO_READ.to_string());
    }

    // Truncating integer mean, matching the deployed reader.
    let y_avg = (glyphs.iter().map(|b| b.y as u64).sum::<u64>() / glyphs.len() as u64) as u32;

    let mut line_one: Vec<DetectionBox> = glyphs.iter().filter(|b| b.y < y_avg).copied().collect();
    let mut line_two: Vec<DetectionBox> = glyphs.iter().filter(|b| b.y > y_avg).copied().collect();
    // Stable sorts: ties keep detection order.
    line_one.sort_by_key(|b| b.x);
    line_two.sort_by_key(|b| b.x);

    let mut id = String::with_capacity(line_one.len() + line_two.len());
    for glyph in line_one.iter().chain(line_two.iter()) {
        let ch = glyph_char(glyph.class_id)
            .ok_or(InspectError::UnmappedGlyphClass(glyph.class_id))?;
        id.push(ch);
    }
    Ok(id)
}

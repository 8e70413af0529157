//! Type keys and player commands shown in the help tables

use tabled::{settings::Style, Table, Tabled};

/// Short type keys accepted by `--type`
pub const TYPES: &[(&str, &str)] = &[
    ("mp4", "video/mp4; codecs=\"avc1.4D4041,mp4a.40.2\""),
    ("webm", "video/webm; codecs=\"opus,vp9\""),
    ("mp3", "audio/mpeg"),
    ("mp4a", "audio/mp4; codecs=\"mp4a.40.2\""),
    ("mp4v", "video/mp4; codecs=\"avc1.4D4041\""),
    ("mp4_av1", "video/mp4; codecs=\"av01.0.04M.08\""),
    ("webm_av1", "video/webm; codecs=\"av1\""),
    ("webm_vp8", "video/webm; codecs=\"vp8, vorbis\""),
    ("webm_vp9", "video/webm; codecs=\"vp9\""),
    ("opus", "audio/webm; codecs=\"opus\""),
    ("mp4_opus", "audio/mp4; codecs=\"opus\""),
    ("wav", "audio/wav"),
];

/// Player commands and what they do
pub const COMMANDS: &[(&str, &str)] = &[
    ("--abort N", "Number of appends before aborting the buffer and resetting its options"),
    (
        "--gc SECONDS",
        "Seconds to remove (the keyframe distance) once twice that much has played",
    ),
    ("--type KEY", "One of the type keys from the table below"),
    ("--remove", "Remove the buffer once playback has ended"),
];

/// Content type for a short type key
pub fn content_type_for(key: &str) -> Option<&'static str> {
    TYPES
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, content_type)| *content_type)
}

#[derive(Tabled)]
struct Row {
    #[tabled(rename = "Key")]
    key: &'static str,
    #[tabled(rename = "Description")]
    description: &'static str,
}

fn table(entries: &[(&'static str, &'static str)]) -> String {
    let rows = entries
        .iter()
        .map(|&(key, description)| Row { key, description });
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    table.to_string()
}

/// Render the command and type tables
pub fn help_tables() -> String {
    format!(
        "Commands:\n{}\n\nTypes:\n{}",
        table(COMMANDS),
        table(TYPES)
    )
}

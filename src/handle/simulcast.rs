//! Rid-based simulcast wiring for the outgoing video sender.

use crate::peer::RtpEncoding;

pub const SIMULCAST_RIDS: [&str; 3] = ["h", "m", "l"];

/// The three standard layers: full, half and quarter resolution.
pub fn simulcast_encodings() -> Vec<RtpEncoding> {
    vec![
        RtpEncoding {
            rid: "h".into(),
            active: true,
            max_bitrate: Some(900_000),
            scale_resolution_down_by: None,
        },
        RtpEncoding {
            rid: "m".into(),
            active: true,
            max_bitrate: Some(300_000),
            scale_resolution_down_by: Some(2.0),
        },
        RtpEncoding {
            rid: "l".into(),
            active: true,
            max_bitrate: Some(100_000),
            scale_resolution_down_by: Some(4.0),
        },
    ]
}

/// Fallback for peers whose sender API rejects encoding parameters:
/// rewrites the first video m-section to announce the three send layers.
/// An SDP that already carries a simulcast attribute is left untouched.
pub fn inject_simulcast(sdp: &str) -> String {
    if sdp.contains("a=simulcast:") {
        return sdp.to_owned();
    }

    let newline = if sdp.contains("\r\n") { "\r\n" } else { "\n" };
    let mut lines: Vec<String> =
        sdp.split('\n').map(|l| l.trim_end_matches('\r').to_owned()).collect();
    if lines.last().map(|l| l.is_empty()) == Some(true) {
        lines.pop();
    }

    let video_start = match lines.iter().position(|l| l.starts_with("m=video")) {
        Some(index) => index,
        None => return sdp.to_owned(),
    };
    let section_end = lines[video_start + 1..]
        .iter()
        .position(|l| l.starts_with("m="))
        .map(|offset| video_start + 1 + offset)
        .unwrap_or(lines.len());

    let mut injected = Vec::with_capacity(4);
    for rid in SIMULCAST_RIDS {
        injected.push(format!("a=rid:{rid} send"));
    }
    injected.push(format!("a=simulcast:send {}", SIMULCAST_RIDS.join(";")));
    lines.splice(section_end..section_end, injected);

    let mut out = lines.join(newline);
    out.push_str(newline);
    out
}

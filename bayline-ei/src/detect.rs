//! Wire-format detection
//!
//! Classifies a file as BMS or EMS before parsing. Precedence: an explicit
//! caller hint, then the file extension, then content sniffing, then BMS
//! as the default. Pure function; always returns a best guess.

use std::path::Path;

/// The two competing estimate export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// XML dialect family (Mitchell, CCC ONE, Audatex)
    Bms,
    /// Pipe-delimited record format
    Ems,
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileFormat::Bms => f.write_str("BMS"),
            FileFormat::Ems => f.write_str("EMS"),
        }
    }
}

/// Root element names that identify a BMS document when sniffing content
const BMS_ROOT_MARKERS: &[&str] = &["<CIECA", "<VehicleDamageEstimateAddRq", "<Estimate"];

/// Classify a file by name, content, and optional caller hint.
///
/// `.txt` is ambiguous and falls through to content sniffing; files that
/// defeat every heuristic default to BMS, the more common format.
pub fn detect_format(filename: &str, content: &str, hint: Option<FileFormat>) -> FileFormat {
    if let Some(format) = hint {
        return format;
    }

    match extension_of(filename).as_deref() {
        Some("xml") | Some("bms") => return FileFormat::Bms,
        Some("ems") | Some("csv") => return FileFormat::Ems,
        _ => {}
    }

    if let Some(format) = sniff_content(content) {
        return format;
    }

    FileFormat::Bms
}

fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// True when a marker opens an element of exactly that name. The element
/// name must end right after the marker, or `<Estimate` would also claim
/// `<EstimateResponse>`.
fn contains_bms_root(head: &str) -> bool {
    BMS_ROOT_MARKERS.iter().any(|marker| {
        head.match_indices(marker).any(|(start, _)| {
            match head[start + marker.len()..].chars().next() {
                Some(c) => matches!(c, '>' | '/' | ' ' | '\t' | '\r' | '\n'),
                None => true,
            }
        })
    })
}

fn sniff_content(content: &str) -> Option<FileFormat> {
    let head = content.trim_start();
    if head.starts_with("<?xml") {
        return Some(FileFormat::Bms);
    }

    // Known BMS roots may appear without an XML declaration. The slice end
    // must land on a char boundary; lossy decoding can leave multibyte
    // characters anywhere.
    let mut end = head.len().min(256);
    while !head.is_char_boundary(end) {
        end -= 1;
    }
    if contains_bms_root(&head[..end]) {
        return Some(FileFormat::Bms);
    }

    // EMS announces itself with a pipe-delimited HDR record up front
    if let Some(first_line) = content.lines().find(|line| !line.trim().is_empty()) {
        let line = first_line.trim();
        if line.contains('|') && line.split('|').next() == Some("HDR") {
            return Some(FileFormat::Ems);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_hint_always_wins() {
        assert_eq!(
            detect_format("estimate.xml", "<?xml version=\"1.0\"?>", Some(FileFormat::Ems)),
            FileFormat::Ems
        );
    }

    #[test]
    fn extension_beats_content() {
        // An .ems file is EMS even when the content leads with XML-ish whitespace
        let content = "   \n\t HDR|Mitchell|7.1|20240815\nCLM|CLM-1234\n";
        assert_eq!(detect_format("estimate.ems", content, None), FileFormat::Ems);

        assert_eq!(detect_format("export.bms", "whatever", None), FileFormat::Bms);
        assert_eq!(detect_format("export.csv", "whatever", None), FileFormat::Ems);
    }

    #[test]
    fn txt_falls_through_to_content_sniffing() {
        assert_eq!(
            detect_format("estimate.txt", "<?xml version=\"1.0\"?><Estimate/>", None),
            FileFormat::Bms
        );
        assert_eq!(
            detect_format("estimate.txt", "HDR|CCC ONE|2.0|20240815\n", None),
            FileFormat::Ems
        );
    }

    #[test]
    fn bare_root_element_sniffs_as_bms() {
        assert_eq!(
            detect_format("upload", "  <Estimate><RONumber>4521</RONumber></Estimate>", None),
            FileFormat::Bms
        );
        // Attributes and self-closing forms still count
        assert_eq!(
            detect_format("upload", "<Estimate version=\"2.0\"></Estimate>", None),
            FileFormat::Bms
        );
    }

    #[test]
    fn longer_element_names_do_not_match_the_estimate_root() {
        // An EMS file quoting an <EstimateResponse> element must not be
        // reclassified by the sniffer
        let content = "HDR|Mitchell|7.1|20240815\nREM|see <EstimateResponse> attachment\n";
        assert_eq!(detect_format("upload", content, None), FileFormat::Ems);
    }

    #[test]
    fn undetectable_content_defaults_to_bms() {
        assert_eq!(detect_format("mystery.dat", "nothing recognizable", None), FileFormat::Bms);
        assert_eq!(detect_format("", "", None), FileFormat::Bms);
    }
}

// FILE: src/core/dicom.rs
//! DICOM instance identification.
//!
//! Reads just enough of a DICOM stream to find the four tags that identify
//! an instance, then hashes them the way the host names its instances:
//! SHA-1 of `patient|study|series|sop`, printed as five dash-separated groups
//! of eight hex digits.
//!
//! Both Part-10 files (preamble + `DICM` + meta group) and bare datasets are
//! accepted. Deflated transfer syntaxes are not.

use sha1::{Digest, Sha1};
use crate::engine::ContentIdentifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Tag(u16, u16);

const TRANSFER_SYNTAX_UID: Tag = Tag(0x0002, 0x0010);
const SOP_INSTANCE_UID: Tag = Tag(0x0008, 0x0018);
const PATIENT_ID: Tag = Tag(0x0010, 0x0020);
const STUDY_INSTANCE_UID: Tag = Tag(0x0020, 0x000D);
const SERIES_INSTANCE_UID: Tag = Tag(0x0020, 0x000E);

const ITEM: Tag = Tag(0xFFFE, 0xE000);
const ITEM_DELIMITATION: Tag = Tag(0xFFFE, 0xE00D);
const SEQUENCE_DELIMITATION: Tag = Tag(0xFFFE, 0xE0DD);

const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;
const MAX_NESTING: usize = 32;
const PREAMBLE_LEN: usize = 128;

const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
const EXPLICIT_VR_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";
const DEFLATED_TRANSFER_SYNTAXES: &[&str] = &["1.2.840.10008.1.2.1.99", "1.2.840.10008.1.2.4.95"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    ImplicitLittle,
    ExplicitLittle,
    ExplicitBig,
}

impl Encoding {
    fn for_transfer_syntax(uid: &str) -> Option<Self> {
        if DEFLATED_TRANSFER_SYNTAXES.contains(&uid) {
            return None;
        }
        Some(match uid {
            IMPLICIT_VR_LITTLE_ENDIAN => Encoding::ImplicitLittle,
            EXPLICIT_VR_BIG_ENDIAN => Encoding::ExplicitBig,
            // Every other syntax, compressed ones included, stores the
            // dataset itself as explicit VR little endian
            _ => Encoding::ExplicitLittle,
        })
    }

    fn big_endian(self) -> bool {
        self == Encoding::ExplicitBig
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn skip(&mut self, n: u32) -> Option<()> {
        self.bytes(n as usize).map(|_| ())
    }

    fn peek_group_le(&self) -> Option<u16> {
        let b = self.data.get(self.pos..self.pos + 2)?;
        Some(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u16(&mut self, big: bool) -> Option<u16> {
        let b = self.bytes(2)?;
        let raw = [b[0], b[1]];
        Some(if big { u16::from_be_bytes(raw) } else { u16::from_le_bytes(raw) })
    }

    fn u32(&mut self, big: bool) -> Option<u32> {
        let b = self.bytes(4)?;
        let raw = [b[0], b[1], b[2], b[3]];
        Some(if big { u32::from_be_bytes(raw) } else { u32::from_le_bytes(raw) })
    }
}

struct Header {
    tag: Tag,
    vr: Option<[u8; 2]>,
    length: u32,
}

fn has_long_length(vr: &[u8; 2]) -> bool {
    matches!(
        vr,
        b"OB" | b"OD" | b"OF" | b"OL" | b"OV" | b"OW" | b"SQ" | b"SV" | b"UC" | b"UN" | b"UR" | b"UT" | b"UV"
    )
}

fn read_header(r: &mut Reader<'_>, encoding: Encoding) -> Option<Header> {
    let big = encoding.big_endian();
    let tag = Tag(r.u16(big)?, r.u16(big)?);

    // Items and delimiters never carry a VR
    if tag.0 == 0xFFFE {
        return Some(Header { tag, vr: None, length: r.u32(big)? });
    }

    match encoding {
        Encoding::ImplicitLittle => Some(Header { tag, vr: None, length: r.u32(false)? }),
        Encoding::ExplicitLittle | Encoding::ExplicitBig => {
            let vr_bytes = r.bytes(2)?;
            let vr = [vr_bytes[0], vr_bytes[1]];
            let length = if has_long_length(&vr) {
                r.skip(2)?;
                r.u32(big)?
            } else {
                r.u16(big)? as u32
            };
            Some(Header { tag, vr: Some(vr), length })
        }
    }
}

/// Skip the items of an undefined-length sequence, up to and including its
/// delimiter.
fn skip_sequence(r: &mut Reader<'_>, encoding: Encoding, depth: usize) -> Option<()> {
    if depth > MAX_NESTING {
        return None;
    }
    loop {
        let header = read_header(r, encoding)?;
        match header.tag {
            SEQUENCE_DELIMITATION => return Some(()),
            ITEM if header.length == UNDEFINED_LENGTH => skip_item(r, encoding, depth + 1)?,
            ITEM => r.skip(header.length)?,
            _ => return None,
        }
    }
}

fn skip_item(r: &mut Reader<'_>, encoding: Encoding, depth: usize) -> Option<()> {
    if depth > MAX_NESTING {
        return None;
    }
    loop {
        let header = read_header(r, encoding)?;
        if header.tag == ITEM_DELIMITATION {
            return Some(());
        }
        if header.length == UNDEFINED_LENGTH {
            skip_sequence(r, nested_encoding(&header, encoding), depth + 1)?;
        } else {
            r.skip(header.length)?;
        }
    }
}

/// An explicit `UN` element of undefined length holds implicit VR content.
fn nested_encoding(header: &Header, encoding: Encoding) -> Encoding {
    match header.vr {
        Some(vr) if &vr == b"UN" => Encoding::ImplicitLittle,
        _ => encoding,
    }
}

fn text(value: &[u8]) -> String {
    String::from_utf8_lossy(value)
        .trim_matches(|c: char| c == ' ' || c == '\0')
        .to_string()
}

/// The identifying attributes of one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceKeys {
    pub patient_id: String,
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub sop_instance_uid: String,
}

impl InstanceKeys {
    /// Host-style instance identifier.
    pub fn instance_id(&self) -> String {
        let mut hasher = Sha1::new();
        hasher.update(format!(
            "{}|{}|{}|{}",
            self.patient_id, self.study_instance_uid, self.series_instance_uid, self.sop_instance_uid
        ));
        let digest = hex::encode(hasher.finalize());
        format!(
            "{}-{}-{}-{}-{}",
            &digest[0..8], &digest[8..16], &digest[16..24], &digest[24..32], &digest[32..40]
        )
    }
}

/// Extract the identifying attributes, or `None` if `data` is not a DICOM
/// instance this reader understands.
pub fn read_instance_keys(data: &[u8]) -> Option<InstanceKeys> {
    let has_preamble = data.len() >= PREAMBLE_LEN + 4 && &data[PREAMBLE_LEN..PREAMBLE_LEN + 4] == b"DICM";
    let mut reader = Reader::new(if has_preamble { &data[PREAMBLE_LEN + 4..] } else { data });

    let encoding = match reader.peek_group_le()? {
        0x0002 => read_meta_group(&mut reader)?,
        0x0008 if !has_preamble => sniff_encoding(data)?,
        _ => return None,
    };

    read_dataset(&mut reader, encoding)
}

/// Consume the file meta group (always explicit VR little endian) and
/// return the dataset encoding it announces.
fn read_meta_group(r: &mut Reader<'_>) -> Option<Encoding> {
    let mut transfer_syntax = None;
    while r.remaining() >= 4 && r.peek_group_le() == Some(0x0002) {
        let header = read_header(r, Encoding::ExplicitLittle)?;
        if header.length == UNDEFINED_LENGTH {
            return None;
        }
        let value = r.bytes(header.length as usize)?;
        if header.tag == TRANSFER_SYNTAX_UID {
            transfer_syntax = Some(text(value));
        }
    }
    Encoding::for_transfer_syntax(&transfer_syntax?)
}

/// Bare datasets carry no transfer syntax; an explicit VR shows up as two
/// uppercase letters right after the first tag.
fn sniff_encoding(data: &[u8]) -> Option<Encoding> {
    let vr = data.get(4..6)?;
    if vr.iter().all(|b| b.is_ascii_uppercase()) {
        Some(Encoding::ExplicitLittle)
    } else {
        Some(Encoding::ImplicitLittle)
    }
}

fn read_dataset(r: &mut Reader<'_>, encoding: Encoding) -> Option<InstanceKeys> {
    let mut keys = InstanceKeys::default();
    let mut found_study = false;
    let mut found_series = false;
    let mut found_sop = false;

    // Top-level elements are sorted by tag, so stop after the last one needed
    while r.remaining() > 0 {
        let header = read_header(r, encoding)?;
        if header.tag > SERIES_INSTANCE_UID {
            break;
        }
        if header.length == UNDEFINED_LENGTH {
            skip_sequence(r, nested_encoding(&header, encoding), 0)?;
            continue;
        }

        let value = r.bytes(header.length as usize)?;
        match header.tag {
            SOP_INSTANCE_UID => {
                keys.sop_instance_uid = text(value);
                found_sop = true;
            }
            PATIENT_ID => keys.patient_id = text(value),
            STUDY_INSTANCE_UID => {
                keys.study_instance_uid = text(value);
                found_study = true;
            }
            SERIES_INSTANCE_UID => {
                keys.series_instance_uid = text(value);
                found_series = true;
                break;
            }
            _ => {}
        }
    }

    let complete = found_study && found_series && found_sop
        && !keys.study_instance_uid.is_empty()
        && !keys.series_instance_uid.is_empty()
        && !keys.sop_instance_uid.is_empty();
    complete.then_some(keys)
}

/// Content identifier backed by the DICOM reader above.
#[derive(Debug, Clone, Copy, Default)]
pub struct DicomIdentifier;

impl ContentIdentifier for DicomIdentifier {
    fn identify_bytes(&self, bytes: &[u8]) -> Option<String> {
        read_instance_keys(bytes).map(|keys| keys.instance_id())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use super::testing::*;

    #[test]
    fn test_part10_explicit_little_endian() {
        let data = part10("PAT-1", "1.2.3", "1.2.3.4", "1.2.3.4.5");
        let keys = read_instance_keys(&data).unwrap();
        assert_eq!(keys.patient_id, "PAT-1");
        assert_eq!(keys.study_instance_uid, "1.2.3");
        assert_eq!(keys.series_instance_uid, "1.2.3.4");
        assert_eq!(keys.sop_instance_uid, "1.2.3.4.5");
    }

    #[test]
    fn test_identifier_ignores_encoding() {
        let explicit = part10("PAT-1", "1.2.3", "1.2.3.4", "1.2.3.4.5");
        let implicit = implicit_dataset("PAT-1", "1.2.3", "1.2.3.4", "1.2.3.4.5");
        let id = DicomIdentifier.identify_bytes(&explicit).unwrap();
        assert_eq!(DicomIdentifier.identify_bytes(&implicit), Some(id.clone()));

        let other = part10("PAT-1", "1.2.3", "1.2.3.4", "1.2.3.4.6");
        assert_ne!(DicomIdentifier.identify_bytes(&other), Some(id));
    }

    #[test]
    fn test_instance_id_format() {
        let keys = InstanceKeys {
            patient_id: "p".into(),
            study_instance_uid: "1".into(),
            series_instance_uid: "2".into(),
            sop_instance_uid: "3".into(),
        };
        let id = keys.instance_id();
        assert_eq!(id.len(), 44);
        let groups: Vec<&str> = id.split('-').collect();
        assert_eq!(groups.len(), 5);
        assert!(groups.iter().all(|g| g.len() == 8 && g.chars().all(|c| c.is_ascii_hexdigit())));
        assert_eq!(id, keys.clone().instance_id());
    }

    #[test]
    fn test_missing_patient_id_is_allowed() {
        let mut data = Vec::new();
        implicit(&mut data, &ui(0x0008, 0x0018, "9.8.7"));
        implicit(&mut data, &ui(0x0020, 0x000D, "9"));
        implicit(&mut data, &ui(0x0020, 0x000E, "9.8"));
        let keys = read_instance_keys(&data).unwrap();
        assert_eq!(keys.patient_id, "");
    }

    #[test]
    fn test_missing_required_uid_is_rejected() {
        let mut data = Vec::new();
        implicit(&mut data, &ui(0x0008, 0x0018, "9.8.7"));
        implicit(&mut data, &ui(0x0020, 0x000E, "9.8"));
        assert!(read_instance_keys(&data).is_none());
    }

    #[test]
    fn test_non_dicom_is_rejected() {
        assert!(DicomIdentifier.identify_bytes(b"").is_none());
        assert!(DicomIdentifier.identify_bytes(b"hello, this is not a medical image").is_none());
        assert!(DicomIdentifier.identify_bytes(&vec![0u8; 4096]).is_none());

        // Truncated in the middle of an element
        let data = part10("PAT-1", "1.2.3", "1.2.3.4", "1.2.3.4.5");
        assert!(read_instance_keys(&data[..150]).is_none());
    }

    #[test]
    fn test_deflated_syntax_is_rejected() {
        let mut out = vec![0u8; 128];
        out.extend_from_slice(b"DICM");
        explicit(&mut out, &ui(0x0002, 0x0010, "1.2.840.10008.1.2.1.99"));
        explicit(&mut out, &ui(0x0008, 0x0018, "1.2"));
        assert!(read_instance_keys(&out).is_none());
    }
}

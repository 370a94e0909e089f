//! The environment adapter's XML half: extracting `<UploadId>` from S3's
//! initiate response, and building the completion request body. Kept
//! behind a trait so a host with its own XML parser (a browser's DOM
//! parser, say) can swap implementations without touching the engine.

use quick_xml::events::Event;
use quick_xml::reader::Reader;

pub trait XmlParser: Send + Sync {
    /// Text content of the first element named `tag`, or `None` if absent.
    fn first_text(&self, xml: &str, tag: &str) -> Option<String>;
}

#[derive(Default)]
pub struct QuickXmlParser;

impl XmlParser for QuickXmlParser {
    fn first_text(&self, xml: &str, tag: &str) -> Option<String> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut capturing = false;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) if e.local_name().as_ref() == tag.as_bytes() => {
                    capturing = true;
                }
                Ok(Event::Text(t)) if capturing => {
                    return t.unescape().ok().map(|c| c.into_owned());
                }
                Ok(Event::End(e)) if e.local_name().as_ref() == tag.as_bytes() => {
                    capturing = false;
                }
                Ok(Event::Eof) => return None,
                Err(_) => return None,
                _ => {}
            }
            buf.clear();
        }
    }
}

/// `<CompleteMultipartUpload>` body, parts strictly ascending from 1 per
/// spec §4.3/§6.
pub fn build_complete_multipart_xml(parts: &[(u32, String)]) -> String {
    let mut xml = String::from("<CompleteMultipartUpload>");
    for (part_number, etag) in parts {
        xml.push_str(&format!(
            "<Part><PartNumber>{}</PartNumber><ETag>{}</ETag></Part>",
            part_number, etag
        ));
    }
    xml.push_str("</CompleteMultipartUpload>");
    xml
}

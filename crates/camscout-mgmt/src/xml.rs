//! Namespace-agnostic helpers for reading SOAP responses

use quick_xml::events::Event;
use quick_xml::Reader;

/// A text node together with the local names of its enclosing elements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextNode {
    pub path: Vec<String>,
    pub text: String,
}

impl TextNode {
    /// Local name of the element directly containing the text
    pub fn element(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }

    pub fn is_inside(&self, name: &str) -> bool {
        self.path.iter().any(|p| p == name)
    }
}

/// Parsed document: every text node plus every element name seen
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub texts: Vec<TextNode>,
    pub elements: Vec<String>,
}

impl Document {
    pub fn parse(xml: &str) -> Result<Self, quick_xml::Error> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut doc = Document::default();
        let mut stack: Vec<String> = Vec::new();

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    doc.elements.push(name.clone());
                    stack.push(name);
                }
                Event::Empty(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    doc.elements.push(name);
                }
                Event::End(_) => {
                    stack.pop();
                }
                Event::Text(t) => {
                    let text = t.unescape()?.trim().to_string();
                    if !text.is_empty() {
                        doc.texts.push(TextNode {
                            path: stack.clone(),
                            text,
                        });
                    }
                }
                Event::CData(c) => {
                    let text = String::from_utf8_lossy(&c.into_inner()).trim().to_string();
                    if !text.is_empty() {
                        doc.texts.push(TextNode {
                            path: stack.clone(),
                            text,
                        });
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(doc)
    }

    pub fn has_element(&self, name: &str) -> bool {
        self.elements.iter().any(|e| e == name)
    }

    /// Text of the first element with the given local name
    pub fn first_text(&self, name: &str) -> Option<&str> {
        self.texts
            .iter()
            .find(|t| t.element() == name)
            .map(|t| t.text.as_str())
    }

    /// Text of the first `name` element nested somewhere inside `ancestor`
    pub fn text_within(&self, ancestor: &str, name: &str) -> Option<&str> {
        self.texts
            .iter()
            .find(|t| t.element() == name && t.is_inside(ancestor))
            .map(|t| t.text.as_str())
    }
}

/// SOAP 1.2 fault details
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoapFault {
    /// Code and subcode values, outermost first (e.g. `env:Sender`, `ter:NotAuthorized`)
    pub codes: Vec<String>,
    pub reason: Option<String>,
}

impl SoapFault {
    pub fn from_document(doc: &Document) -> Option<Self> {
        if !doc.has_element("Fault") {
            return None;
        }

        let codes = doc
            .texts
            .iter()
            .filter(|t| t.is_inside("Fault") && t.is_inside("Code") && t.element() == "Value")
            .map(|t| t.text.clone())
            .collect();
        let reason = doc
            .texts
            .iter()
            .find(|t| t.is_inside("Fault") && (t.element() == "Text" || t.element() == "faultstring"))
            .map(|t| t.text.clone());

        Some(Self { codes, reason })
    }

    /// Whether the fault reports an authentication or authorization failure
    pub fn is_auth_failure(&self) -> bool {
        self.codes.iter().any(|c| {
            let local = c.rsplit(':').next().unwrap_or(c);
            matches!(local, "NotAuthorized" | "FailedAuthentication" | "InvalidSecurity")
        }) || self
            .reason
            .as_deref()
            .map(|r| r.to_lowercase().contains("not authorized"))
            .unwrap_or(false)
    }

    pub fn describe(&self) -> String {
        match (&self.reason, self.codes.last()) {
            (Some(reason), Some(code)) => format!("{} ({})", reason, code),
            (Some(reason), None) => reason.clone(),
            (None, Some(code)) => code.clone(),
            (None, None) => "SOAP fault".to_string(),
        }
    }
}

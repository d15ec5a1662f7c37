//! RTT edit actions and their wire elements.
//!
//! | Element | Action | Defaults |
//! |---------|--------|----------|
//! | `<t p="…">text</t>` | insert | `p` = end of text |
//! | `<e p="…" n="…"/>` | erase `n` code points ending at `p` | `p` = end, `n` = 1 |
//! | `<w n="…"/>` | wait `n` milliseconds | `n` = 1 |
//!
//! Omitted attributes stay `None` here. Defaults are resolved by the
//! receiver at the moment an action is applied, against the text as it is
//! then.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::stanza::Element;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Insert { pos: Option<usize>, text: String },
    Erase { pos: Option<usize>, count: Option<usize> },
    Wait { millis: u64 },
}

/// An action recorded by the send queue, stamped with the time it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedAction {
    pub action: Action,
    pub timestamp: Timestamp,
}

impl Action {
    /// Wire element for this action.
    pub fn to_element(&self) -> Element {
        match self {
            Action::Insert { pos, text } => {
                let mut e = Element::new("t").with_text(text.as_str());
                if let Some(p) = pos {
                    e.set_attr("p", p);
                }
                e
            }
            Action::Erase { pos, count } => {
                let mut e = Element::new("e");
                if let Some(p) = pos {
                    e.set_attr("p", p);
                }
                if let Some(n) = count {
                    e.set_attr("n", n);
                }
                e
            }
            Action::Wait { millis } => Element::new("w").with_attr("n", millis),
        }
    }

    /// Decode one child of an `<rtt>` element. Unknown elements yield `None`.
    pub fn from_element(elem: &Element) -> Option<Action> {
        match elem.name.as_str() {
            "t" => Some(Action::Insert {
                pos: numeric_attr(elem, "p"),
                text: elem.text(),
            }),
            "e" => Some(Action::Erase {
                pos: numeric_attr(elem, "p"),
                count: numeric_attr(elem, "n"),
            }),
            "w" => Some(Action::Wait {
                millis: numeric_attr(elem, "n").unwrap_or(1),
            }),
            other => {
                log::debug!("Ignoring unknown rtt action element <{other}>");
                None
            }
        }
    }
}

/// Parse a numeric attribute. A malformed value is treated as absent.
pub(crate) fn numeric_attr<T: FromStr>(elem: &Element, key: &str) -> Option<T> {
    let raw = elem.attr(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Malformed {key}=\"{raw}\" on <{}>, treating as absent", elem.name);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_encoding_omits_defaults() {
        let insert = Action::Insert {
            pos: None,
            text: "hi".into(),
        };
        assert_eq!(insert.to_element().to_string(), "<t>hi</t>");

        let erase = Action::Erase {
            pos: Some(4),
            count: None,
        };
        assert_eq!(erase.to_element().to_string(), "<e p=\"4\"/>");

        let erase = Action::Erase {
            pos: Some(4),
            count: Some(2),
        };
        assert_eq!(erase.to_element().to_string(), "<e n=\"2\" p=\"4\"/>");

        let empty = Action::Insert {
            pos: Some(0),
            text: String::new(),
        };
        assert_eq!(empty.to_element().to_string(), "<t p=\"0\"/>");
    }

    #[test]
    fn test_decode() {
        let t = Element::new("t").with_attr("p", 3).with_text("𝒥x");
        assert_eq!(
            Action::from_element(&t),
            Some(Action::Insert {
                pos: Some(3),
                text: "𝒥x".into()
            })
        );
        assert_eq!(
            Action::from_element(&Element::new("e")),
            Some(Action::Erase {
                pos: None,
                count: None
            })
        );
        assert_eq!(
            Action::from_element(&Element::new("w")),
            Some(Action::Wait { millis: 1 })
        );
        assert_eq!(Action::from_element(&Element::new("x")), None);
    }

    #[test]
    fn test_malformed_attributes_are_absent() {
        let e = Element::new("e").with_attr("p", "abc").with_attr("n", "-2");
        assert_eq!(
            Action::from_element(&e),
            Some(Action::Erase {
                pos: None,
                count: None
            })
        );
        let w = Element::new("w").with_attr("n", " 250 ");
        assert_eq!(Action::from_element(&w), Some(Action::Wait { millis: 250 }));
    }
}

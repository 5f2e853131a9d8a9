//! Builder for carrier voice markup (TwiML).

use std::fmt::Write;

/// Accumulates verbs and renders them as one `<Response>` document.
#[derive(Debug, Clone, Default)]
pub struct TwimlBuilder {
    elements: Vec<TwimlElement>,
}

#[derive(Debug, Clone)]
enum TwimlElement {
    Say {
        text: String,
        voice: String,
        language: String,
    },
    Record {
        action: String,
        max_length: u32,
        timeout: u32,
        play_beep: bool,
        finish_on_key: Option<char>,
    },
    Dial {
        number: String,
    },
    Pause {
        length: u32,
    },
    Hangup,
}

/// Parameters of a `<Record>` verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSpec {
    /// Longest recording accepted, in seconds.
    pub max_length: u32,
    /// Seconds of silence that end the recording.
    pub timeout: u32,
    pub play_beep: bool,
    pub finish_on_key: Option<char>,
}

impl TwimlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Speaks `text` with the given voice.
    pub fn say(mut self, text: &str, voice: &str, language: &str) -> Self {
        self.elements.push(TwimlElement::Say {
            text: xml_escape(text),
            voice: xml_escape(voice),
            language: xml_escape(language),
        });
        self
    }

    /// Records the caller and posts the recording to `action`.
    pub fn record(mut self, action: &str, spec: RecordSpec) -> Self {
        self.elements.push(TwimlElement::Record {
            action: xml_escape(action),
            max_length: spec.max_length,
            timeout: spec.timeout,
            play_beep: spec.play_beep,
            finish_on_key: spec.finish_on_key,
        });
        self
    }

    /// Transfers the call to `number`.
    pub fn dial(mut self, number: &str) -> Self {
        self.elements.push(TwimlElement::Dial {
            number: xml_escape(number),
        });
        self
    }

    pub fn pause(mut self, seconds: u32) -> Self {
        self.elements.push(TwimlElement::Pause { length: seconds });
        self
    }

    pub fn hangup(mut self) -> Self {
        self.elements.push(TwimlElement::Hangup);
        self
    }

    /// Renders the XML document.
    pub fn build(self) -> String {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response>\n");
        for element in &self.elements {
            render_element(&mut xml, element);
        }
        xml.push_str("</Response>");
        xml
    }
}

fn render_element(xml: &mut String, element: &TwimlElement) {
    match element {
        TwimlElement::Say {
            text,
            voice,
            language,
        } => {
            let _ = writeln!(
                xml,
                "  <Say voice=\"{}\" language=\"{}\">{}</Say>",
                voice, language, text
            );
        }
        TwimlElement::Record {
            action,
            max_length,
            timeout,
            play_beep,
            finish_on_key,
        } => {
            let _ = write!(
                xml,
                "  <Record action=\"{}\" method=\"POST\" maxLength=\"{}\" timeout=\"{}\" playBeep=\"{}\"",
                action, max_length, timeout, play_beep
            );
            if let Some(key) = finish_on_key {
                let _ = write!(xml, " finishOnKey=\"{}\"", key);
            }
            let _ = writeln!(xml, "/>");
        }
        TwimlElement::Dial { number } => {
            let _ = writeln!(xml, "  <Dial>{}</Dial>", number);
        }
        TwimlElement::Pause { length } => {
            let _ = writeln!(xml, "  <Pause length=\"{}\"/>", length);
        }
        TwimlElement::Hangup => {
            let _ = writeln!(xml, "  <Hangup/>");
        }
    }
}

/// Escapes the five XML special characters.
pub fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_verbs_in_order() {
        let xml = TwimlBuilder::new()
            .say("Hello", "Polly.Joanna-Neural", "en-US")
            .record(
                "/webhooks/twilio/voice-auth",
                RecordSpec {
                    max_length: 15,
                    timeout: 10,
                    play_beep: false,
                    finish_on_key: Some('#'),
                },
            )
            .dial("+18005550199")
            .build();

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response>"));
        assert!(xml.ends_with("</Response>"));
        let say = xml.find("<Say").unwrap();
        let record = xml.find("<Record").unwrap();
        let dial = xml.find("<Dial>").unwrap();
        assert!(say < record && record < dial);
        assert!(xml.contains("maxLength=\"15\" timeout=\"10\" playBeep=\"false\" finishOnKey=\"#\""));
    }

    #[test]
    fn say_text_is_escaped() {
        let xml = TwimlBuilder::new()
            .say("Say \"more help\" or I'm <done> & bye", "v", "en")
            .hangup()
            .build();
        assert!(xml.contains("Say &quot;more help&quot; or I&apos;m &lt;done&gt; &amp; bye"));
        assert!(xml.contains("<Hangup/>"));
    }

    #[test]
    fn empty_response_is_valid() {
        assert_eq!(
            TwimlBuilder::new().build(),
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response>\n</Response>"
        );
    }
}

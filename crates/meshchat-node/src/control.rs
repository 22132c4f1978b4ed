//! Line-oriented control protocol read from stdin.
//!
//! ```text
//! send <address> <text...>
//! read <address>
//! fav | unfav | block | unblock <fingerprint-hex>
//! verify <qr-code>
//! qr
//! quit
//! ```

use meshchat_shared::{Fingerprint, PeerAddress};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Send { to: PeerAddress, text: String },
    Read(PeerAddress),
    Favorite { peer: Fingerprint, favorite: bool },
    Block { peer: Fingerprint, blocked: bool },
    Verify(String),
    ShowQr,
    Quit,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,

    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("not a fingerprint: {0}")]
    BadFingerprint(String),
}

pub fn parse(line: &str) -> Result<ControlCommand, ParseError> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    match verb {
        "" => Err(ParseError::Empty),
        "send" => {
            let (to, text) = rest
                .split_once(char::is_whitespace)
                .map(|(to, text)| (to, text.trim()))
                .filter(|(_, text)| !text.is_empty())
                .ok_or(ParseError::Usage("send <address> <text>"))?;
            Ok(ControlCommand::Send {
                to: PeerAddress::new(to),
                text: text.to_string(),
            })
        }
        "read" => single(rest, "read <address>").map(|a| ControlCommand::Read(PeerAddress::new(a))),
        "fav" | "unfav" => {
            let peer = fingerprint(single(rest, "fav|unfav <fingerprint>")?)?;
            Ok(ControlCommand::Favorite {
                peer,
                favorite: verb == "fav",
            })
        }
        "block" | "unblock" => {
            let peer = fingerprint(single(rest, "block|unblock <fingerprint>")?)?;
            Ok(ControlCommand::Block {
                peer,
                blocked: verb == "block",
            })
        }
        "verify" => single(rest, "verify <code>").map(|c| ControlCommand::Verify(c.to_string())),
        "qr" => Ok(ControlCommand::ShowQr),
        "quit" | "exit" => Ok(ControlCommand::Quit),
        other => Err(ParseError::Unknown(other.to_string())),
    }
}

fn single<'a>(rest: &'a str, usage: &'static str) -> Result<&'a str, ParseError> {
    if rest.is_empty() || rest.contains(char::is_whitespace) {
        return Err(ParseError::Usage(usage));
    }
    Ok(rest)
}

fn fingerprint(raw: &str) -> Result<Fingerprint, ParseError> {
    Fingerprint::from_hex(raw).map_err(|_| ParseError::BadFingerprint(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send_keeps_spaces_in_text() {
        assert_eq!(
            parse("send 0011223344556677  hello there  ").unwrap(),
            ControlCommand::Send {
                to: PeerAddress::new("0011223344556677"),
                text: "hello there".into(),
            }
        );
        assert_eq!(
            parse("send 0011223344556677"),
            Err(ParseError::Usage("send <address> <text>"))
        );
    }

    #[test]
    fn test_parse_fingerprint_commands() {
        let fp = Fingerprint::from_noise_key(&[7u8; 32]);
        assert_eq!(
            parse(&format!("unfav {}", fp.to_hex())).unwrap(),
            ControlCommand::Favorite {
                peer: fp,
                favorite: false,
            }
        );
        assert_eq!(
            parse(&format!("block {}", fp.to_hex())).unwrap(),
            ControlCommand::Block {
                peer: fp,
                blocked: true,
            }
        );
        assert!(matches!(parse("fav nothex"), Err(ParseError::BadFingerprint(_))));
    }

    #[test]
    fn test_parse_simple_and_unknown() {
        assert_eq!(parse("  qr "), Ok(ControlCommand::ShowQr));
        assert_eq!(parse("quit"), Ok(ControlCommand::Quit));
        assert_eq!(parse(""), Err(ParseError::Empty));
        assert_eq!(parse("dance"), Err(ParseError::Unknown("dance".into())));
        assert_eq!(
            parse("read a b"),
            Err(ParseError::Usage("read <address>"))
        );
    }
}

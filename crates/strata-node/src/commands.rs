//! Operator command parsing.
//!
//! The REPL reads whitespace-tokenized lines from stdin. Each verb is owned
//! by one engine; the runtime dispatches after parsing here.

use strata_types::NodeNum;

/// A parsed operator command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// `PING <node> <msg>`: routed ping over the forwarding tables.
    Ping { node: NodeNum, msg: String },
    /// `PING CHORD <node> <msg>`: direct ping on the application port.
    ChordPing { node: NodeNum, msg: String },
    /// `DUMP ROUTES|NEIGHBORS|LSA`.
    Dump(DumpTable),
    /// `JOIN <node>`: join the ring through that node (self = landmark).
    Join(NodeNum),
    /// `LEAVE`: voluntary ring departure.
    Leave,
    /// `RINGSTATE`: start a ring walk.
    Ringstate,
    /// `FINGERS`: print the local finger table.
    Fingers,
    /// `PUBLISH <file>`: ingest and publish an index file.
    Publish { path: String },
    /// `SEARCH <term>...`: multi-term intersection search.
    Search { terms: Vec<String> },
}

/// Which table `DUMP` prints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DumpTable {
    Routes,
    Neighbors,
    Lsa,
}

/// Parse one REPL line. Empty lines yield `None`; anything else either
/// parses or explains itself.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(&verb) = tokens.first() else {
        return Ok(None);
    };
    let command = match verb {
        "PING" => match tokens.get(1) {
            Some(&"CHORD") => {
                let node = parse_node(tokens.get(2))?;
                let msg = join_from(&tokens, 3)?;
                Command::ChordPing { node, msg }
            }
            Some(_) => {
                let node = parse_node(tokens.get(1))?;
                let msg = join_from(&tokens, 2)?;
                Command::Ping { node, msg }
            }
            None => return Err("usage: PING [CHORD] <node> <msg>".to_string()),
        },
        "DUMP" => match tokens.get(1).copied() {
            Some("ROUTES") | Some("ROUTING") => Command::Dump(DumpTable::Routes),
            Some("NEIGHBORS") | Some("NEIGHBOURS") => Command::Dump(DumpTable::Neighbors),
            Some("LSA") => Command::Dump(DumpTable::Lsa),
            _ => return Err("usage: DUMP ROUTES|NEIGHBORS|LSA".to_string()),
        },
        "JOIN" => Command::Join(parse_node(tokens.get(1))?),
        "LEAVE" => Command::Leave,
        "RINGSTATE" => Command::Ringstate,
        "FINGERS" => Command::Fingers,
        "PUBLISH" => match tokens.get(1) {
            Some(path) => Command::Publish {
                path: (*path).to_string(),
            },
            None => return Err("usage: PUBLISH <file>".to_string()),
        },
        "SEARCH" => {
            if tokens.len() < 2 {
                return Err("usage: SEARCH <term>...".to_string());
            }
            Command::Search {
                terms: tokens[1..].iter().map(|s| s.to_string()).collect(),
            }
        }
        other => return Err(format!("unknown command {other:?}")),
    };
    Ok(Some(command))
}

fn parse_node(token: Option<&&str>) -> Result<NodeNum, String> {
    let token = token.ok_or_else(|| "missing node id".to_string())?;
    token
        .parse()
        .map_err(|_| format!("bad node id {token:?}"))
}

fn join_from(tokens: &[&str], start: usize) -> Result<String, String> {
    if tokens.len() <= start {
        return Err("missing message".to_string());
    }
    Ok(tokens[start..].join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_variants() {
        assert_eq!(
            parse("PING 3 hello there").expect("parse"),
            Some(Command::Ping {
                node: 3,
                msg: "hello there".to_string(),
            })
        );
        assert_eq!(
            parse("PING CHORD 2 hi").expect("parse"),
            Some(Command::ChordPing {
                node: 2,
                msg: "hi".to_string(),
            })
        );
        assert!(parse("PING").is_err());
        assert!(parse("PING x hi").is_err());
        assert!(parse("PING 3").is_err());
    }

    #[test]
    fn test_dump_variants() {
        assert_eq!(
            parse("DUMP ROUTES").expect("parse"),
            Some(Command::Dump(DumpTable::Routes))
        );
        assert_eq!(
            parse("DUMP NEIGHBOURS").expect("parse"),
            Some(Command::Dump(DumpTable::Neighbors))
        );
        assert_eq!(
            parse("DUMP LSA").expect("parse"),
            Some(Command::Dump(DumpTable::Lsa))
        );
        assert!(parse("DUMP").is_err());
        assert!(parse("DUMP FOO").is_err());
    }

    #[test]
    fn test_ring_commands() {
        assert_eq!(parse("JOIN 1").expect("parse"), Some(Command::Join(1)));
        assert_eq!(parse("LEAVE").expect("parse"), Some(Command::Leave));
        assert_eq!(parse("RINGSTATE").expect("parse"), Some(Command::Ringstate));
        assert_eq!(parse("FINGERS").expect("parse"), Some(Command::Fingers));
        assert!(parse("JOIN").is_err());
    }

    #[test]
    fn test_search_and_publish() {
        assert_eq!(
            parse("SEARCH alpha beta").expect("parse"),
            Some(Command::Search {
                terms: vec!["alpha".to_string(), "beta".to_string()],
            })
        );
        assert_eq!(
            parse("PUBLISH keys.txt").expect("parse"),
            Some(Command::Publish {
                path: "keys.txt".to_string(),
            })
        );
        assert!(parse("SEARCH").is_err());
    }

    #[test]
    fn test_blank_and_unknown() {
        assert_eq!(parse("   ").expect("parse"), None);
        assert!(parse("FROB 1").is_err());
    }
}

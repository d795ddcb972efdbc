//! Scenario: codec fuzz.
//!
//! For every message tag of all three families, ten thousand random
//! instances encode to exactly their serialized size and decode back to
//! the original. Random corruptions must fail cleanly, never panic.

use std::net::Ipv4Addr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use strata_types::{RingId, DIGEST_LEN};
use strata_wire::chord::{ChordMessage, ChordPayload};
use strata_wire::lsr::{Lsp, LsrMessage, LsrPayload, Probe};
use strata_wire::search::{SearchMessage, SearchPayload};

const ROUNDS: usize = 10_000;

fn addr(rng: &mut StdRng) -> Ipv4Addr {
    Ipv4Addr::from(rng.gen::<u32>())
}

fn digest(rng: &mut StdRng) -> RingId {
    let mut bytes = [0u8; DIGEST_LEN];
    rng.fill(&mut bytes[..]);
    RingId(bytes)
}

fn string(rng: &mut StdRng) -> String {
    let len = rng.gen_range(0..64);
    (0..len)
        .map(|_| char::from(rng.gen_range(b' '..=b'~')))
        .collect()
}

fn strings(rng: &mut StdRng) -> Vec<String> {
    let count = rng.gen_range(0..8);
    (0..count).map(|_| string(rng)).collect()
}

fn probe(rng: &mut StdRng) -> Probe {
    Probe {
        dest: addr(rng),
        msg: string(rng),
    }
}

fn lsr_payload(tag: u8, rng: &mut StdRng) -> LsrPayload {
    match tag {
        1 => LsrPayload::PingReq(probe(rng)),
        2 => LsrPayload::PingRsp(probe(rng)),
        3 => LsrPayload::NdReq(probe(rng)),
        4 => LsrPayload::NdRsp(probe(rng)),
        _ => LsrPayload::Lsp(Lsp {
            lsp_seq: rng.gen(),
            neighbors: (0..rng.gen_range(0..16)).map(|_| addr(rng)).collect(),
            dest: addr(rng),
            msg: string(rng),
        }),
    }
}

fn chord_payload(tag: u8, rng: &mut StdRng) -> ChordPayload {
    match tag {
        1 => ChordPayload::PingReq { msg: string(rng) },
        2 => ChordPayload::PingRsp { msg: string(rng) },
        3 => ChordPayload::JoinChord,
        4 => ChordPayload::FindSuccessor {
            dest: addr(rng),
            target: digest(rng),
        },
        5 => ChordPayload::JoinChordSuccess {
            successor: addr(rng),
        },
        6 => ChordPayload::JoinChordFail,
        7 => ChordPayload::Notify,
        8 => ChordPayload::StabilizeReq,
        9 => ChordPayload::StabilizeResp {
            predecessor: addr(rng),
        },
        10 => ChordPayload::Ringstate {
            initiator: addr(rng),
        },
        11 => ChordPayload::LeaveSuccessor {
            predecessor: addr(rng),
        },
        12 => ChordPayload::LeavePredecessor {
            successor: addr(rng),
        },
        13 => ChordPayload::FindFinger {
            dest: addr(rng),
            target: digest(rng),
            index: rng.gen_range(1..=160),
        },
        14 => ChordPayload::FindFingerSuccess {
            finger: addr(rng),
            index: rng.gen_range(1..=160),
        },
        15 => ChordPayload::Lookup {
            flag: rng.gen_range(0..3),
            initiator: addr(rng),
            target: digest(rng),
            key: string(rng),
        },
        _ => ChordPayload::LookupSuccess {
            flag: rng.gen_range(0..3),
            responsible: addr(rng),
            key: string(rng),
        },
    }
}

fn search_payload(tag: u8, rng: &mut StdRng) -> SearchPayload {
    match tag {
        1 => SearchPayload::Store {
            key: string(rng),
            docs: strings(rng),
        },
        2 => SearchPayload::SearchInitial {
            initiator: addr(rng),
            terms: strings(rng),
        },
        3 => SearchPayload::SearchStep {
            initiator: addr(rng),
            terms: strings(rng),
            docs: strings(rng),
        },
        4 => SearchPayload::SearchComplete {
            terms: strings(rng),
            docs: strings(rng),
        },
        _ => SearchPayload::PassKeys {
            key: string(rng),
            docs: strings(rng),
        },
    }
}

#[test]
fn lsr_messages_roundtrip_exactly() {
    let mut rng = StdRng::seed_from_u64(0x15C1);
    for tag in 1..=5u8 {
        for _ in 0..ROUNDS {
            let message = LsrMessage {
                seq: rng.gen(),
                ttl: rng.gen(),
                originator: addr(&mut rng),
                payload: lsr_payload(tag, &mut rng),
            };
            let bytes = message.encode();
            assert_eq!(bytes.len(), message.serialized_size());
            assert_eq!(LsrMessage::decode(&bytes).expect("decode"), message);
        }
    }
}

#[test]
fn chord_messages_roundtrip_exactly() {
    let mut rng = StdRng::seed_from_u64(0xC402D);
    for tag in 1..=16u8 {
        for _ in 0..ROUNDS {
            let message = ChordMessage {
                txn: rng.gen(),
                payload: chord_payload(tag, &mut rng),
            };
            assert_eq!(message.tag(), tag);
            let bytes = message.encode();
            assert_eq!(bytes.len(), message.serialized_size());
            assert_eq!(ChordMessage::decode(&bytes).expect("decode"), message);
        }
    }
}

#[test]
fn search_messages_roundtrip_exactly() {
    let mut rng = StdRng::seed_from_u64(0x5EA2C4);
    for tag in 1..=5u8 {
        for _ in 0..ROUNDS {
            let message = SearchMessage {
                txn: rng.gen(),
                payload: search_payload(tag, &mut rng),
            };
            assert_eq!(message.tag(), tag);
            let bytes = message.encode();
            assert_eq!(bytes.len(), message.serialized_size());
            assert_eq!(SearchMessage::decode(&bytes).expect("decode"), message);
        }
    }
}

#[test]
fn corrupted_frames_fail_cleanly() {
    let mut rng = StdRng::seed_from_u64(0xBADF00D);
    for _ in 0..ROUNDS {
        let message = ChordMessage {
            txn: rng.gen(),
            payload: chord_payload(rng.gen_range(1..=16), &mut rng),
        };
        let bytes = message.encode();
        // Truncate at a random point: must error, never panic.
        let cut = rng.gen_range(0..bytes.len());
        assert!(ChordMessage::decode(&bytes[..cut]).is_err());
        // Flip a random byte: must either decode to something or error.
        let mut mutated = bytes.clone();
        let pos = rng.gen_range(0..mutated.len());
        mutated[pos] ^= 1 << rng.gen_range(0..8);
        let _ = ChordMessage::decode(&mutated);
    }
}

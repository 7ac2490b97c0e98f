//! Property-based tests for the transcript
//!
//! Random operation sequences must never expose more than one streaming
//! message, a duplicate id, or a change to a finalized message.

use super::{IdGenerator, Message, MessageId, Role, Transcript};
use chrono::Utc;
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
enum Op {
    AppendUser(String),
    StartStream,
    Fragment(String),
    Finish,
    /// Mutate some earlier message by index, finalized or not
    LateFragment { index: usize, text: String },
    Reset,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        "[a-z]{1,5}".prop_map(Op::AppendUser),
        Just(Op::StartStream),
        "[a-z兜]{0,3}".prop_map(Op::Fragment),
        Just(Op::Finish),
        (0usize..8, "[a-z]{1,3}").prop_map(|(index, text)| Op::LateFragment { index, text }),
        Just(Op::Reset),
    ]
}

fn check_invariants(transcript: &Transcript, finalized: &HashMap<MessageId, Message>) {
    let messages = transcript.messages();
    assert!(messages.iter().filter(|m| m.streaming).count() <= 1);

    let unique: HashSet<_> = messages.iter().map(|m| m.id.clone()).collect();
    assert_eq!(unique.len(), messages.len());

    for message in messages {
        if let Some(frozen) = finalized.get(&message.id) {
            assert_eq!(message, frozen, "finalized message changed");
        }
    }
}

proptest! {
    #[test]
    fn prop_transcript_invariants(ops in prop::collection::vec(arb_op(), 1..60)) {
        let gen = IdGenerator::new();
        let now = Utc::now();
        let mut transcript = Transcript::new();
        let mut active: Option<MessageId> = None;
        let mut expected_text = String::new();
        let mut finalized: HashMap<MessageId, Message> = HashMap::new();

        for op in ops {
            match op {
                Op::AppendUser(text) => {
                    let message = Message::new(gen.next_id(now), Role::User, text, now);
                    finalized.insert(message.id.clone(), message.clone());
                    prop_assert!(transcript.append(message).is_ok());
                }
                Op::StartStream => {
                    let id = gen.next_id(now);
                    let result = transcript.append(Message::bot_placeholder(id.clone(), now));
                    if active.is_some() {
                        prop_assert!(result.is_err());
                    } else {
                        prop_assert!(result.is_ok());
                        active = Some(id);
                        expected_text.clear();
                    }
                }
                Op::Fragment(text) => {
                    if let Some(id) = &active {
                        prop_assert!(transcript.mutate_last(id, |d| d.push_str(&text)));
                        expected_text.push_str(&text);
                        prop_assert_eq!(&transcript.get(id).unwrap().text, &expected_text);
                    }
                }
                Op::Finish => {
                    if let Some(id) = active.take() {
                        prop_assert!(transcript.mutate_last(&id, |draft| draft.finish()));
                        let message = transcript.get(&id).unwrap().clone();
                        prop_assert_eq!(&message.text, &expected_text);
                        finalized.insert(id, message);
                    }
                }
                Op::LateFragment { index, text } => {
                    if let Some(target) = transcript.messages().get(index).cloned() {
                        let applied = transcript.mutate_last(&target.id, |d| d.push_str(&text));
                        prop_assert_eq!(applied, target.streaming);
                        if applied {
                            expected_text.push_str(&text);
                        }
                    }
                }
                Op::Reset => {
                    let greeting = Message::new(gen.next_id(now), Role::Bot, "hi", now);
                    prop_assert!(transcript.replace_all(vec![greeting.clone()]).is_ok());
                    prop_assert_eq!(transcript.len(), 1);
                    active = None;
                    finalized.clear();
                    finalized.insert(greeting.id.clone(), greeting);
                }
            }
            check_invariants(&transcript, &finalized);
        }
    }
}

//! Persona instruction construction
//!
//! Combines the editable base persona text with the user's profile into the
//! system instruction a chat session is created with. Also holds the fixed
//! persona copy (greeting, apology, quick prompts).

use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Default persona establishing the assistant's role
pub const BASE_INSTRUCTION: &str = r#"
You are "DouZhidao" (兜知道), a warm, professional, and empathetic AI assistant acting as the user's "Private Parenting Specialist" (私人育婴师). You are dedicated to helping pregnant women and mothers of young children (0-3 years).

Your Persona:
- Name: 兜知道 (Dou Zhidao).
- Role: Private Parenting Specialist (私人育婴师).
- Tone: Gentle, encouraging, patient, and non-judgmental. Like a knowledgeable older sister or a professional midwife.
- Language: Simplified Chinese (unless asked otherwise).
- Expertise: Pregnancy stages, fetal development, postpartum recovery, breastfeeding, infant care, sleep training, and early nutrition.

Guidelines:
1. **Safety First**: If a user asks about medical symptoms (bleeding, high fever, severe pain, lack of fetal movement), explicitly urge them to consult a doctor or go to the hospital immediately. Do not attempt to diagnose.
2. **Empathy**: Acknowledge the emotional challenges of motherhood (anxiety, fatigue). Validate their feelings.
3. **Clarity**: Use simple language. Avoid overly complex medical jargon unless you explain it. Use bullet points for steps or tips.
4. **Formatting**: Use Markdown for readability (bolding key terms, lists).

Disclaimer to include when relevant: "Starting with a friendly reminder: I am an AI, not a doctor. My advice is for reference only. Please consult a medical professional for specific health concerns."
"#;

/// First bot message of every fresh transcript
pub const GREETING: &str = "你好呀！我是兜知道，你的私人育婴师。无论是孕期的疑惑，还是带娃的烦恼，都可以跟我说说哦。请问今天有什么可以帮您的？🌸";

/// Bot text shown in place of a reply that failed
pub const FALLBACK_REPLY: &str = "哎呀，网络好像有点小问题，请稍后再试一下吧。";

/// Separator between the base instruction and the profile block
const SEPARATOR: &str = "\n\n";

const PROFILE_HEADER: &str = "【当前用户（宝妈/孕妈）提供的背景信息】\n请在回答时参考以下信息，提供更针对性的建议：\n";

/// Baby's gender as entered in the profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Boy,
    Girl,
    #[default]
    Unknown,
}

impl Gender {
    /// Label used in the instruction; `None` for unknown
    pub fn label(self) -> Option<&'static str> {
        match self {
            Gender::Boy => Some("男宝"),
            Gender::Girl => Some("女宝"),
            Gender::Unknown => None,
        }
    }
}

/// Background facts about the pregnancy or child
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileContext {
    /// Baby or fetus nickname
    pub nickname: Option<String>,
    /// Due date or birth date, `YYYY-MM-DD` as entered
    pub date: Option<String>,
    pub gender: Gender,
    pub notes: Option<String>,
}

impl ProfileContext {
    /// True when no field would contribute a line
    pub fn is_empty(&self) -> bool {
        populated(self.nickname.as_deref()).is_none()
            && populated(self.date.as_deref()).is_none()
            && self.gender.label().is_none()
            && populated(self.notes.as_deref()).is_none()
    }
}

fn populated(field: Option<&str>) -> Option<&str> {
    field.filter(|value| !value.trim().is_empty())
}

/// Render the profile block; empty when the profile carries nothing.
pub fn profile_block(profile: &ProfileContext) -> String {
    if profile.is_empty() {
        return String::new();
    }

    let mut block = String::from(PROFILE_HEADER);
    // Writing to a String cannot fail
    if let Some(nickname) = populated(profile.nickname.as_deref()) {
        let _ = writeln!(block, "- 宝宝/胎儿昵称：{nickname}");
    }
    if let Some(date) = populated(profile.date.as_deref()) {
        let _ = writeln!(block, "- 预产期或出生日期：{date}");
    }
    if let Some(label) = profile.gender.label() {
        let _ = writeln!(block, "- 性别：{label}");
    }
    if let Some(notes) = populated(profile.notes.as_deref()) {
        let _ = writeln!(block, "- 特殊情况/备注：{notes}");
    }
    block
}

/// Build the effective system instruction for a session.
pub fn compose(base_instruction: &str, profile: &ProfileContext) -> String {
    let mut instruction = String::with_capacity(base_instruction.len() + 256);
    instruction.push_str(base_instruction);
    instruction.push_str(SEPARATOR);
    instruction.push_str(&profile_block(profile));
    instruction
}

/// Topic of a quick prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptCategory {
    Pregnancy,
    Baby,
    Health,
    Nutrition,
}

/// Canned question the user can send with one tap
#[derive(Debug, Clone, Serialize)]
pub struct QuickPrompt {
    pub id: &'static str,
    pub label: &'static str,
    pub category: PromptCategory,
    pub prompt: &'static str,
}

pub const QUICK_PROMPTS: &[QuickPrompt] = &[
    QuickPrompt {
        id: "p1",
        label: "孕期饮食禁忌",
        category: PromptCategory::Nutrition,
        prompt: "我现在怀孕了，有哪些食物是绝对不能吃的？如果不小心吃了一点怎么办？",
    },
    QuickPrompt {
        id: "p2",
        label: "宝宝一直哭闹",
        category: PromptCategory::Baby,
        prompt: "宝宝一直哭闹不睡觉，排除了饿和尿布湿，还有什么原因？怎么安抚？",
    },
    QuickPrompt {
        id: "p3",
        label: "待产包准备",
        category: PromptCategory::Pregnancy,
        prompt: "去医院生宝宝需要准备哪些必备物品？请给我一个精简实用的待产包清单。",
    },
    QuickPrompt {
        id: "p4",
        label: "产后恢复",
        category: PromptCategory::Health,
        prompt: "产后肚子怎么恢复？什么时候可以开始做运动？",
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bullet_lines(instruction: &str) -> Vec<&str> {
        instruction.lines().filter(|l| l.starts_with("- ")).collect()
    }

    #[test]
    fn test_empty_profile_leaves_base_unchanged() {
        let out = compose("BASE", &ProfileContext::default());
        assert_eq!(out, "BASE\n\n");
    }

    #[test]
    fn test_whitespace_fields_count_as_empty() {
        let profile = ProfileContext {
            nickname: Some("  ".to_string()),
            date: Some(String::new()),
            gender: Gender::Unknown,
            notes: Some("\n".to_string()),
        };
        assert!(profile.is_empty());
        assert_eq!(compose("BASE", &profile), "BASE\n\n");
    }

    #[test]
    fn test_notes_only() {
        let profile = ProfileContext {
            notes: Some("双胞胎".to_string()),
            ..Default::default()
        };
        let out = compose("BASE", &profile);
        assert!(out.starts_with("BASE\n\n【当前用户（宝妈/孕妈）提供的背景信息】\n"));
        assert_eq!(bullet_lines(&out), vec!["- 特殊情况/备注：双胞胎"]);
    }

    #[test]
    fn test_full_profile_field_order() {
        let profile = ProfileContext {
            nickname: Some("小汤圆".to_string()),
            date: Some("2026-03-01".to_string()),
            gender: Gender::Girl,
            notes: Some("早产".to_string()),
        };
        let out = compose("BASE", &profile);
        assert_eq!(
            bullet_lines(&out),
            vec![
                "- 宝宝/胎儿昵称：小汤圆",
                "- 预产期或出生日期：2026-03-01",
                "- 性别：女宝",
                "- 特殊情况/备注：早产",
            ]
        );
        assert!(out.ends_with("- 特殊情况/备注：早产\n"));
    }

    #[test]
    fn test_unknown_gender_omitted() {
        let profile = ProfileContext {
            nickname: Some("豆豆".to_string()),
            gender: Gender::Unknown,
            ..Default::default()
        };
        let out = compose("BASE", &profile);
        assert!(!out.contains("性别"));
        assert_eq!(bullet_lines(&out).len(), 1);
    }

    #[test]
    fn test_gender_alone_populates_block() {
        let profile = ProfileContext {
            gender: Gender::Boy,
            ..Default::default()
        };
        assert_eq!(bullet_lines(&compose("BASE", &profile)), vec!["- 性别：男宝"]);
    }

    #[test]
    fn test_profile_deserializes_with_missing_fields() {
        let profile: ProfileContext = serde_json::from_str(r#"{"gender":"girl"}"#).unwrap();
        assert_eq!(profile.gender, Gender::Girl);
        assert!(profile.nickname.is_none());
    }

    #[test]
    fn test_quick_prompt_ids_unique() {
        let mut ids: Vec<_> = QUICK_PROMPTS.iter().map(|p| p.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), QUICK_PROMPTS.len());
    }

    fn arb_field() -> impl Strategy<Value = Option<String>> {
        prop_oneof![Just(None), "[ \t\n]{0,4}".prop_map(Some), "[a-z兜知道]{1,8}".prop_map(Some)]
    }

    fn arb_gender() -> impl Strategy<Value = Gender> {
        prop_oneof![Just(Gender::Boy), Just(Gender::Girl), Just(Gender::Unknown)]
    }

    fn arb_profile() -> impl Strategy<Value = ProfileContext> {
        (arb_field(), arb_field(), arb_gender(), arb_field()).prop_map(
            |(nickname, date, gender, notes)| ProfileContext {
                nickname,
                date,
                gender,
                notes,
            },
        )
    }

    proptest! {
        #[test]
        fn prop_compose_prefix_and_line_count(base in "[a-zA-Z ]{0,40}", profile in arb_profile()) {
            let out = compose(&base, &profile);
            let prefix = format!("{base}\n\n");
            let block = out.strip_prefix(&prefix);
            prop_assert!(block.is_some());
            let block = block.unwrap_or_default();
            if profile.is_empty() {
                prop_assert!(block.is_empty());
            } else {
                let expected = [
                    populated(profile.nickname.as_deref()).is_some(),
                    populated(profile.date.as_deref()).is_some(),
                    profile.gender.label().is_some(),
                    populated(profile.notes.as_deref()).is_some(),
                ]
                .iter()
                .filter(|present| **present)
                .count();
                prop_assert_eq!(bullet_lines(block).len(), expected);
            }
        }

        #[test]
        fn prop_compose_deterministic(base in ".{0,20}", profile in arb_profile()) {
            prop_assert_eq!(compose(&base, &profile), compose(&base, &profile));
        }
    }
}

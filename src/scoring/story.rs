//! ストーリー分析
//!
//! 会話をナラティブの「ストーリーアーク」に分割し、重要メッセージへの
//! ラベル付けと販売テクニックの採点を行う2本目のAI判定。
//! ベーススコアには影響しないソフトな付加情報で、プロバイダー障害・
//! 認証情報なし・メッセージ不足のときは単にNoneを返す。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::completion::JudgmentProvider;

/// ストーリー分析を行う最小メッセージ数
pub const STORY_MIN_MESSAGES: usize = 8;

const MAX_ARCS: usize = 5;
const MAX_LABELS_PER_ARC: usize = 30;
const MAX_PATTERN_STEPS: usize = 10;
const MAX_SELL_QUOTES: usize = 5;
const MAX_KEY_ELEMENTS: usize = 8;

/// 重要メッセージへのラベル
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageLabel {
    pub message_index: usize,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sublabel: Option<String>,
    pub is_sell_message: bool,
}

/// 販売パターンチェックリストの1項目
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatternStep {
    pub description: String,
    pub achieved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_ref: Option<usize>,
}

/// 1つのストーリーアーク
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoryArc {
    pub title: String,
    pub message_range: (usize, usize),
    pub message_labels: Vec<MessageLabel>,
    pub sell_count: usize,
    pub sell_quotes: Vec<String>,
    pub story_flow_analysis: String,
    pub fan_investment: String,
    pub key_elements: Vec<String>,
    pub selling_pattern: Vec<PatternStep>,
}

/// ストーリー分析の結果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoryAnalysis {
    pub story_arcs: Vec<StoryArc>,
    /// 販売テクニックの総合評価 [0, 100]
    pub overall_selling_score: f64,
    pub fan_investment_moment: Option<String>,
}

/// ストーリー分析のシステムプロンプト
///
/// 販売パターンは2通りとも正解として扱う。購買シグナル直後の即売りは
/// 最高評価であって減点対象ではない、というバイアスをここで固定する。
const STORY_SYSTEM_PROMPT: &str = r#"You are an expert OnlyFans agency QA analyst specializing in selling technique analysis.

You analyze chatter-fan conversations to identify STORY ARCS and SELLING PATTERNS.

## Your Task
Given a conversation between a CHATTER (the agency employee) and a FAN, you must:

1. IDENTIFY STORY ARCS — contiguous sequences of themed messages that form a narrative (e.g., a fantasy scenario, a roleplay, a build-up to a sale)
2. LABEL KEY MESSAGES — tag important moments with labels
3. ANALYZE SELLING PATTERNS — how the chatter embedded sells into the conversation flow

## Message Labels (use these exact strings)
- STORY_START — beginning of a narrative/fantasy arc
- STORY_END — natural conclusion of a story arc
- BUYING_SIGNAL — fan shows interest in purchasing (e.g., "show me", "I want", "send it", emotional investment)
- SELL — chatter attempts to sell content (embedded or direct). Number them: SELL #1, SELL #2, etc.
- EMOTIONAL_HOOK — chatter creates emotional connection ("I've never felt this way before", exclusivity)
- PEAK_ENGAGEMENT — fan is at maximum emotional investment
- VISUAL_SETUP — chatter paints a vivid scene ("imagine...")
- SENSORY_PACING — chatter uses sensory language to build tension
- FAN_INVESTED — moment when fan becomes deeply invested (writing own fantasy, long responses)
- SOFT_SELL — gentle sell attempt disguised as part of the story

## Selling Pattern Checklist
There are TWO valid selling approaches. Evaluate which the chatter used:

**APPROACH A: Buying Signal → Immediate Sell (BEST when fan signals intent)**
When a fan gives a buying signal ("show me", "I want to see", "send it"), the correct move is to sell IMMEDIATELY. Do NOT penalize fast sells after buying signals — that's perfect execution.
1. Fan gives buying signal (request, desire, curiosity)
2. Chatter responds with sell IMMEDIATELY (within 1-2 messages) ← THIS IS CORRECT
3. Sell matches what the fan asked for (relevant content)
4. Follow-up after sell to keep engagement alive
5. Look for next opportunity

**APPROACH B: Story Arc → Embedded Sell (when no buying signal yet)**
When no buying signal exists, the chatter should build interest first:
1. Start with "imagine" / visual setup
2. Build 2-3 story messages to create desire
3. Sell embedded naturally in story flow
4. Continue engagement after sell
5. Drop emotional hook for next opportunity

CRITICAL: If a fan explicitly asks for content or signals buying intent, and the chatter sells immediately — that is a PERFECT sell, NOT a mistake. Score it highly. The worst thing a chatter can do is ignore a buying signal to "build more story".

## Output Format
Return valid JSON only. No markdown wrapping.

{
  "storyArcs": [
    {
      "title": "Short descriptive title of the arc",
      "messageRange": [startIndex, endIndex],
      "messageLabels": [
        { "messageIndex": 0, "label": "STORY_START", "sublabel": null, "isSellMessage": false },
        { "messageIndex": 5, "label": "SELL", "sublabel": "SELL WITHIN STORY", "isSellMessage": true }
      ],
      "sellCount": 2,
      "sellQuotes": ["exact chatter sell message text"],
      "storyFlowAnalysis": "Brief analysis of whether sells broke the narrative",
      "fanInvestment": "Description of when/how the fan became invested",
      "keyElements": ["kitchen setting", "imagine visual setup"],
      "sellingApproach": "A_BUYING_SIGNAL or B_STORY_ARC",
      "sellingPattern": [
        { "description": "Fan gave buying signal", "achieved": true, "messageRef": 5 },
        { "description": "Chatter sold immediately after signal", "achieved": true, "messageRef": 6 }
      ]
    }
  ],
  "overallSellingScore": 85,
  "fanInvestmentMoment": "By message #12 fan is writing own fantasy"
}

IMPORTANT:
- messageIndex is 0-based relative to the conversation messages array
- Only label messages that have significance (most will have none)
- If no clear story arc exists, return empty storyArcs array
- overallSellingScore: 0-100 rating of the chatter's selling technique
- Be concise in analysis text (1-2 sentences each)"#;

/// ストーリー分析を実行する
///
/// プロバイダー未設定・メッセージ不足・呼び出し失敗のいずれもNone。
pub async fn run_story_analysis(
    provider: Option<&dyn JudgmentProvider>,
    formatted_conversation: &str,
    message_count: usize,
) -> Option<StoryAnalysis> {
    let Some(provider) = provider else {
        tracing::warn!("Story analysis provider not configured, skipping");
        return None;
    };

    if message_count < STORY_MIN_MESSAGES {
        return None;
    }

    let user_prompt = format!(
        "Analyze this conversation for story arcs and selling patterns:\n\n{}",
        formatted_conversation
    );

    let content = match provider.complete_json(STORY_SYSTEM_PROMPT, &user_prompt).await {
        Ok(content) => content,
        Err(e) => {
            tracing::error!("Story analysis call failed: {}", e);
            return None;
        }
    };

    match serde_json::from_str::<Value>(&content) {
        Ok(raw) => Some(validate_story_analysis(&raw)),
        Err(e) => {
            tracing::error!("Story analysis returned malformed JSON: {}", e);
            None
        }
    }
}

/// AI出力を検証して正規化する
///
/// 各リストに上限をかけ、型の合わない値はデフォルトに落とす。
pub fn validate_story_analysis(raw: &Value) -> StoryAnalysis {
    let mut story_arcs = Vec::new();

    if let Some(arcs) = raw.get("storyArcs").and_then(Value::as_array) {
        for arc in arcs.iter().take(MAX_ARCS) {
            let message_labels = arc
                .get("messageLabels")
                .and_then(Value::as_array)
                .map(|labels| {
                    labels
                        .iter()
                        .take(MAX_LABELS_PER_ARC)
                        .map(|l| MessageLabel {
                            message_index: l
                                .get("messageIndex")
                                .and_then(Value::as_u64)
                                .unwrap_or(0) as usize,
                            label: string_or_empty(l.get("label")),
                            sublabel: l
                                .get("sublabel")
                                .and_then(Value::as_str)
                                .map(|s| s.to_string()),
                            is_sell_message: l
                                .get("isSellMessage")
                                .and_then(Value::as_bool)
                                .unwrap_or(false),
                        })
                        .collect()
                })
                .unwrap_or_default();

            let selling_pattern = arc
                .get("sellingPattern")
                .and_then(Value::as_array)
                .map(|steps| {
                    steps
                        .iter()
                        .take(MAX_PATTERN_STEPS)
                        .map(|p| PatternStep {
                            description: string_or_empty(p.get("description")),
                            achieved: p.get("achieved").and_then(Value::as_bool).unwrap_or(false),
                            message_ref: p
                                .get("messageRef")
                                .and_then(Value::as_u64)
                                .map(|v| v as usize),
                        })
                        .collect()
                })
                .unwrap_or_default();

            let message_range = arc
                .get("messageRange")
                .and_then(Value::as_array)
                .map(|range| {
                    (
                        range.first().and_then(Value::as_u64).unwrap_or(0) as usize,
                        range.get(1).and_then(Value::as_u64).unwrap_or(0) as usize,
                    )
                })
                .unwrap_or((0, 0));

            story_arcs.push(StoryArc {
                title: arc
                    .get("title")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .unwrap_or("Untitled Arc")
                    .to_string(),
                message_range,
                message_labels,
                sell_count: arc.get("sellCount").and_then(Value::as_u64).unwrap_or(0) as usize,
                sell_quotes: string_list(arc.get("sellQuotes"), MAX_SELL_QUOTES),
                story_flow_analysis: string_or_empty(arc.get("storyFlowAnalysis")),
                fan_investment: string_or_empty(arc.get("fanInvestment")),
                key_elements: string_list(arc.get("keyElements"), MAX_KEY_ELEMENTS),
                selling_pattern,
            });
        }
    }

    let overall_selling_score = raw
        .get("overallSellingScore")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
        .clamp(0.0, 100.0);

    StoryAnalysis {
        story_arcs,
        overall_selling_score,
        fan_investment_moment: raw
            .get("fanInvestmentMoment")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string()),
    }
}

fn string_or_empty(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn string_list(value: Option<&Value>, cap: usize) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .take(cap)
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

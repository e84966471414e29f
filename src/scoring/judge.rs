//! AI判定呼び出し
//!
//! トランスクリプトと文脈情報をプロンプトに整形し、構造化判定を
//! 取得してクランプ済みのサブスコアに変換する。呼び出し失敗は
//! Noneになり、エンジン側は決定的スコアのみで続行する。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::completion::JudgmentProvider;
use crate::scoring::types::{sanitize_tags, Archetype};

/// AI判定を実行する最小メッセージ数。これ未満では判定が
/// 当てにならないため呼び出し自体を行わない。
pub const JUDGE_MIN_MESSAGES: usize = 3;

const MAX_NOTABLE_QUOTES: usize = 4;
const QUOTE_TEXT_CAP: usize = 120;
const QUOTE_CONTEXT_CAP: usize = 100;

/// 引用の評価区分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteKind {
    Great,
    Good,
    Bad,
    Ugly,
}

impl QuoteKind {
    pub fn from_raw(raw: &str) -> Option<Self> {
        match raw {
            "great" => Some(Self::Great),
            "good" => Some(Self::Good),
            "bad" => Some(Self::Bad),
            "ugly" => Some(Self::Ugly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Great => "great",
            Self::Good => "good",
            Self::Bad => "bad",
            Self::Ugly => "ugly",
        }
    }
}

/// 判定が抜き出した特徴的な引用
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotableQuote {
    pub text: String,
    pub kind: QuoteKind,
    pub context: String,
}

/// AI判定の結果（クランプ・正規化済み）
#[derive(Debug, Clone)]
pub struct AiScoringResult {
    /// SLA上書き値: 0-25
    pub sla_score: i32,
    /// フォローアップ: 0-20
    pub followup_score: i32,
    /// 購買シグナル対応: 0-20
    pub trigger_score: i32,
    /// 品質: 0-20
    pub quality_score: i32,
    pub detected_archetype: Option<Archetype>,
    pub mistake_tags: Vec<String>,
    pub strength_tags: Vec<String>,
    pub notes: String,
    pub notable_quotes: Vec<NotableQuote>,
    pub copy_paste_detected: bool,
    pub missed_high_intent: bool,
    pub spam_detected: bool,
}

/// 判定に渡す文脈情報
#[derive(Debug, Clone)]
pub struct JudgmentContext {
    pub chatter_email: String,
    pub creator_name: String,
    pub avg_response_time_sec: Option<f64>,
    pub robot_phrase_count: usize,
    pub creative_phrase_count: usize,
    pub total_messages: usize,
}

const SYSTEM_PROMPT: &str = "You are an expert QA scorer for an OnlyFans chatting agency. \
You grade chatter performance honestly and specifically. Never inflate scores. \
Be calibrated: 50 is average, 80+ is excellent, below 40 is poor.";

/// 採点プロンプトを組み立てる
pub fn build_scoring_prompt(formatted_conversations: &str, ctx: &JudgmentContext) -> String {
    let avg_response = ctx
        .avg_response_time_sec
        .map(|sec| format!("{}s", sec.round() as i64))
        .unwrap_or_else(|| "unknown".to_string());

    format!(
        r#"Score this chatter's performance over the last hour.

CHATTER: {chatter}
MODEL ACCOUNT: {creator}
Messages analyzed: {total}
Robot phrases detected: {robot}
Creative phrases detected: {creative}
Avg response time: {avg_response}

CONVERSATIONS:
{conversations}

SCORING RUBRIC (85 points from AI, revenue is separate):

1. SLA/Responsiveness (0-25):
   - <2min avg reply = 25, <5min = 20, 5-15min = 15, >15min = 5, no replies = 0
   - Penalize leaving fans on read

2. Follow-up Discipline (0-20):
   - Re-engages cooling conversations proactively
   - Doesn't leave hot conversations hanging
   - Circles back to interested fans
   - 0 = never follows up, 20 = excellent follow-up game

3. Trigger Handling (0-20):
   - Catches buying signals: "how much", "unlock", "send me", "I want", "price?"
   - Responds to triggers with clear CTA (not just "yes babe")
   - 0 = missed all triggers, 20 = caught and converted every signal

4. Quality/Personalization (0-20):
   - Uses fan's name and personal details
   - Adapts tone to each fan (not one-size-fits-all)
   - Push-pull dynamics, builds tension
   - Non-robotic, creative responses
   - 0 = completely generic, 20 = deeply personalized

ARCHETYPE DETECTION (pick the closest match or null):
- "yes_babe_robot": Generic "yes babe" responses, no personality, autopilot
- "interview_bot": Too many questions back-to-back, kills the mood
- "doormat": Agrees with everything, no tension or challenge
- "commander": Too aggressive, doesn't read the room, pushes too hard
- "tease": Great tension building but never closes, leaves money on table
- "chameleon": Adapts style to each fan type — the gold standard

HARD PENALTY FLAGS:
- copyPasteDetected: true if >30% of responses look copy-pasted (identical or near-identical)
- missedHighIntent: true if fan said "how much", "send me", "I want to buy" and chatter ignored it
- spamDetected: true if chatter sent 3+ identical messages in a row or mass-blasted

NOTABLE QUOTES (required, 1-4 quotes):
Pull actual chatter messages that show skill or lack of skill. Categorize each:
- "great": Elite-level message — perfect push-pull, creative, made the fan spend
- "good": Solid professional work — good CTA, personalized, on-brand
- "bad": Missed opportunity or lazy response — flat ack, generic, ignored signal
- "ugly": Cringeworthy — robotic, begging, killed the vibe, lost money
Include the exact chatter message text (short, max 80 chars) and brief context of what happened.

Return ONLY valid JSON:
{{
  "slaScore": 0-25,
  "followupScore": 0-20,
  "triggerScore": 0-20,
  "qualityScore": 0-20,
  "detectedArchetype": "string or null",
  "mistakeTags": ["missed_trigger","flat_ack","no_cta","copy_paste","too_slow","no_followup","permission_asking","begging","too_available"],
  "strengthTags": ["good_push_pull","strong_cta","adapted_to_fan","built_tension","proactive_followup","used_fan_name","created_urgency","good_closer"],
  "notes": "2-3 sentence summary of performance",
  "notableQuotes": [{{"text":"exact chatter message","type":"great|good|bad|ugly","context":"what was happening"}}],
  "copyPasteDetected": false,
  "missedHighIntent": false,
  "spamDetected": false
}}"#,
        chatter = ctx.chatter_email,
        creator = ctx.creator_name,
        total = ctx.total_messages,
        robot = ctx.robot_phrase_count,
        creative = ctx.creative_phrase_count,
        avg_response = avg_response,
        conversations = formatted_conversations,
    )
}

/// AI判定を実行する
///
/// 失敗時はNoneを返す。呼び出し側はAIサブスコアを0として続行する。
pub async fn run_ai_scoring(
    provider: &dyn JudgmentProvider,
    formatted_conversations: &str,
    ctx: &JudgmentContext,
) -> Option<AiScoringResult> {
    let prompt = build_scoring_prompt(formatted_conversations, ctx);

    let content = match provider.complete_json(SYSTEM_PROMPT, &prompt).await {
        Ok(content) => content,
        Err(e) => {
            tracing::error!("AI scoring call failed for {}: {}", ctx.chatter_email, e);
            return None;
        }
    };

    match serde_json::from_str::<Value>(&content) {
        Ok(raw) => Some(parse_ai_scoring(&raw)),
        Err(e) => {
            tracing::error!("AI scoring returned malformed JSON: {}", e);
            None
        }
    }
}

/// AI出力をクランプ・正規化する
pub fn parse_ai_scoring(raw: &Value) -> AiScoringResult {
    let notable_quotes = raw
        .get("notableQuotes")
        .and_then(Value::as_array)
        .map(|quotes| {
            quotes
                .iter()
                .filter_map(|q| {
                    let text = q.get("text").and_then(Value::as_str)?;
                    if text.is_empty() {
                        return None;
                    }
                    let kind = q
                        .get("type")
                        .and_then(Value::as_str)
                        .and_then(QuoteKind::from_raw)?;
                    Some(NotableQuote {
                        text: text.chars().take(QUOTE_TEXT_CAP).collect(),
                        kind,
                        context: q
                            .get("context")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .chars()
                            .take(QUOTE_CONTEXT_CAP)
                            .collect(),
                    })
                })
                .take(MAX_NOTABLE_QUOTES)
                .collect()
        })
        .unwrap_or_default();

    AiScoringResult {
        sla_score: clamped_score(raw.get("slaScore"), 25),
        followup_score: clamped_score(raw.get("followupScore"), 20),
        trigger_score: clamped_score(raw.get("triggerScore"), 20),
        quality_score: clamped_score(raw.get("qualityScore"), 20),
        detected_archetype: raw
            .get("detectedArchetype")
            .and_then(Value::as_str)
            .and_then(Archetype::from_raw),
        mistake_tags: sanitize_tags(string_list(raw.get("mistakeTags"))),
        strength_tags: sanitize_tags(string_list(raw.get("strengthTags"))),
        notes: raw
            .get("notes")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        notable_quotes,
        copy_paste_detected: bool_flag(raw.get("copyPasteDetected")),
        missed_high_intent: bool_flag(raw.get("missedHighIntent")),
        spam_detected: bool_flag(raw.get("spamDetected")),
    }
}

fn clamped_score(value: Option<&Value>, max: i32) -> i32 {
    let score = value.and_then(Value::as_f64).unwrap_or(0.0).round() as i32;
    score.clamp(0, max)
}

fn bool_flag(value: Option<&Value>) -> bool {
    value.and_then(Value::as_bool).unwrap_or(false)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::completion::JudgmentError;
    use async_trait::async_trait;
    use serde_json::json;

    struct CannedProvider(String);

    #[async_trait]
    impl JudgmentProvider for CannedProvider {
        async fn complete_json(
            &self,
            _system_prompt: &str,
            _user_prompt: &str,
        ) -> Result<String, JudgmentError> {
            Ok(self.0.clone())
        }
    }

    fn ctx() -> JudgmentContext {
        JudgmentContext {
            chatter_email: "ann@agency.test".to_string(),
            creator_name: "Luna".to_string(),
            avg_response_time_sec: Some(45.2),
            robot_phrase_count: 2,
            creative_phrase_count: 5,
            total_messages: 12,
        }
    }

    #[test]
    fn test_prompt_includes_context() {
        let prompt = build_scoring_prompt("--- Chat with Rick ---", &ctx());
        assert!(prompt.contains("CHATTER: ann@agency.test"));
        assert!(prompt.contains("MODEL ACCOUNT: Luna"));
        assert!(prompt.contains("Messages analyzed: 12"));
        assert!(prompt.contains("Avg response time: 45s"));
        assert!(prompt.contains("--- Chat with Rick ---"));
    }

    #[test]
    fn test_prompt_unknown_response_time() {
        let mut context = ctx();
        context.avg_response_time_sec = None;
        let prompt = build_scoring_prompt("(no messages in window)", &context);
        assert!(prompt.contains("Avg response time: unknown"));
    }

    #[test]
    fn test_parse_full_result() {
        let raw = json!({
            "slaScore": 22,
            "followupScore": 15,
            "triggerScore": 18,
            "qualityScore": 12,
            "detectedArchetype": "tease",
            "mistakeTags": ["no_cta"],
            "strengthTags": ["built_tension", "used_fan_name"],
            "notes": "Good tension, weak closing.",
            "notableQuotes": [
                { "text": "earn it first babe", "type": "great", "context": "push-pull" },
                { "text": "yes babe", "type": "ugly", "context": "flat ack" }
            ],
            "copyPasteDetected": false,
            "missedHighIntent": true,
            "spamDetected": false
        });

        let result = parse_ai_scoring(&raw);
        assert_eq!(result.sla_score, 22);
        assert_eq!(result.followup_score, 15);
        assert_eq!(result.trigger_score, 18);
        assert_eq!(result.quality_score, 12);
        assert_eq!(result.detected_archetype, Some(Archetype::Tease));
        assert_eq!(result.mistake_tags, vec!["no_cta"]);
        assert_eq!(result.notable_quotes.len(), 2);
        assert_eq!(result.notable_quotes[0].kind, QuoteKind::Great);
        assert!(result.missed_high_intent);
        assert!(!result.copy_paste_detected);
    }

    #[test]
    fn test_parse_clamps_out_of_band_scores() {
        let raw = json!({
            "slaScore": 99,
            "followupScore": -3,
            "triggerScore": 20.7,
            "qualityScore": "broken"
        });

        let result = parse_ai_scoring(&raw);
        assert_eq!(result.sla_score, 25);
        assert_eq!(result.followup_score, 0);
        assert_eq!(result.trigger_score, 20);
        assert_eq!(result.quality_score, 0);
    }

    #[test]
    fn test_parse_archetype_normalization() {
        let unknown = parse_ai_scoring(&json!({ "detectedArchetype": "space_cowboy" }));
        assert_eq!(unknown.detected_archetype, Some(Archetype::Unrecognized));

        let null = parse_ai_scoring(&json!({ "detectedArchetype": null }));
        assert_eq!(null.detected_archetype, None);

        let absent = parse_ai_scoring(&json!({}));
        assert_eq!(absent.detected_archetype, None);
    }

    #[test]
    fn test_parse_quote_validation() {
        let raw = json!({
            "notableQuotes": [
                { "text": "valid", "type": "good", "context": "c" },
                { "text": "bad type", "type": "mediocre", "context": "c" },
                { "text": "", "type": "good", "context": "c" },
                { "text": "no type here" },
                { "text": "q2", "type": "bad", "context": "c" },
                { "text": "q3", "type": "ugly", "context": "c" },
                { "text": "q4", "type": "great", "context": "c" },
                { "text": "q5 over the cap", "type": "good", "context": "c" }
            ]
        });

        let result = parse_ai_scoring(&raw);
        assert_eq!(result.notable_quotes.len(), 4);
        assert!(result.notable_quotes.iter().all(|q| !q.text.is_empty()));
    }

    #[test]
    fn test_parse_quote_truncation() {
        let raw = json!({
            "notableQuotes": [
                { "text": "t".repeat(300), "type": "good", "context": "c".repeat(300) }
            ]
        });
        let result = parse_ai_scoring(&raw);
        assert_eq!(result.notable_quotes[0].text.chars().count(), 120);
        assert_eq!(result.notable_quotes[0].context.chars().count(), 100);
    }

    #[tokio::test]
    async fn test_run_ai_scoring_success() {
        let provider = CannedProvider(
            json!({
                "slaScore": 20,
                "followupScore": 10,
                "triggerScore": 10,
                "qualityScore": 10,
                "detectedArchetype": "chameleon",
                "notes": "ok"
            })
            .to_string(),
        );

        let result = run_ai_scoring(&provider, "transcript", &ctx()).await.unwrap();
        assert_eq!(result.sla_score, 20);
        assert_eq!(result.detected_archetype, Some(Archetype::Chameleon));
    }

    #[tokio::test]
    async fn test_run_ai_scoring_malformed_returns_none() {
        let provider = CannedProvider("{{not json".to_string());
        assert!(run_ai_scoring(&provider, "transcript", &ctx()).await.is_none());
    }

    #[test]
    fn test_quote_kind_roundtrip() {
        for kind in [QuoteKind::Great, QuoteKind::Good, QuoteKind::Bad, QuoteKind::Ugly] {
            assert_eq!(QuoteKind::from_raw(kind.as_str()), Some(kind));
        }
        assert_eq!(QuoteKind::from_raw("meh"), None);
    }
}

//! 프롬프트 조립 - 게이트 판정을 답변 생성 요청으로 변환
//!
//! 근거가 충분하면 시스템 프롬프트 + 컨텍스트 + 질문을 조립합니다.
//! 불충분하면 게이트 방식에 따라 고정 안내 메시지를 돌려주거나
//! 거절을 지시하는 프롬프트를 조립합니다.
//! 답변 생성 자체는 이 크레이트 밖의 소비자가 담당합니다.

use super::gate::{GateDecision, GateMode};

/// 요리 지식 기반 답변용 시스템 프롬프트
pub const RAG_SYSTEM_PROMPT: &str = "\
You are a specialized culinary AI assistant with expertise in cooking and baking recipes. \
You have access to a curated knowledge base of recipes, cooking techniques, and culinary wisdom. \
Follow these guidelines:

**CULINARY EXPERTISE:**
- Always use the provided recipe context and cooking knowledge from the knowledge base
- Focus on providing accurate cooking times, temperatures, ingredient measurements, and techniques
- Help users understand cooking methods, ingredient substitutions, and recipe modifications
- Provide step-by-step guidance for complex cooking or baking procedures

**RESPONSE QUALITY:**
- Be precise with measurements, times, and temperatures
- If only partial recipe information is available, acknowledge the limitations
- Always prioritize the provided recipe knowledge over general cooking knowledge
- If you don't have a specific recipe or cooking information, clearly state that

**SAFETY FIRST:**
- Always mention food safety considerations when relevant
- Warn about potential allergens or dietary restrictions";

/// 근거가 없을 때의 고정 응답
pub const NO_KNOWLEDGE_RESPONSE: &str = "\
I don't have that recipe or cooking information in my culinary knowledge base. \
Could you please ask about a specific recipe, cooking technique, or ingredient that might be in my database?

If you'd like to add recipes or cooking guides, ingest cookbooks, recipe collections, \
or cooking instruction documents into the knowledge base.

I'm specialized in helping with:
- Recipes for cooking and baking
- Cooking techniques and methods
- Ingredient substitutions and modifications
- Recipe scaling and portion adjustments
- Food safety and storage tips";

const CONTEXT_HEADER: &str = "Here is the relevant information from the knowledge base:";

const CONTEXT_FOOTER: &str = "\
Please use this recipe and cooking information to answer the user's culinary question. \
If the information is insufficient for a complete recipe or cooking guidance, \
let the user know what's missing and provide what you can.";

const REFUSAL_INSTRUCTION: &str = "\
No relevant information was found in the knowledge base for this question. \
Do not answer from general knowledge. Tell the user that this recipe or cooking information \
is not in the culinary knowledge base, and suggest asking about a recipe, technique, \
or ingredient that might be covered.";

/// 소비자에게 넘길 처리 계획
#[derive(Debug, Clone, PartialEq)]
pub enum PromptPlan {
    /// 생성 모델에 보낼 완성 프롬프트
    Grounded(String),
    /// 거절을 지시하는 프롬프트
    Refusal(String),
    /// 생성 없이 그대로 보여줄 고정 메시지
    Fallback(&'static str),
}

impl PromptPlan {
    /// 근거 기반 답변인지 여부
    pub fn is_grounded(&self) -> bool {
        matches!(self, PromptPlan::Grounded(_))
    }

    /// 프롬프트 또는 메시지 본문
    pub fn text(&self) -> &str {
        match self {
            PromptPlan::Grounded(prompt) | PromptPlan::Refusal(prompt) => prompt,
            PromptPlan::Fallback(message) => message,
        }
    }
}

/// 게이트 판정과 질문으로 처리 계획 생성
pub fn compose_prompt(decision: &GateDecision, question: &str) -> PromptPlan {
    if !decision.sufficient || decision.context.is_empty() {
        return match decision.mode {
            GateMode::Fallback => PromptPlan::Fallback(NO_KNOWLEDGE_RESPONSE),
            GateMode::Refuse => PromptPlan::Refusal(format!(
                "{}\n\n{}\n\nUser Question: {}",
                RAG_SYSTEM_PROMPT,
                REFUSAL_INSTRUCTION,
                question.trim()
            )),
        };
    }

    PromptPlan::Grounded(format!(
        "{}\n\n{}\n\n{}\n\n{}\n\nUser Question: {}",
        RAG_SYSTEM_PROMPT,
        CONTEXT_HEADER,
        decision.context,
        CONTEXT_FOOTER,
        question.trim()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(sufficient: bool, context: &str) -> GateDecision {
        GateDecision {
            sufficient,
            context: context.to_string(),
            sections: usize::from(sufficient),
            top_score: Some(0.9),
            mode: GateMode::Fallback,
        }
    }

    #[test]
    fn test_grounded_prompt_contains_context_and_question() {
        let plan = compose_prompt(
            &decision(true, "Context 1:\nChill the dough for one hour."),
            "  How long do I chill pie dough? ",
        );

        assert!(plan.is_grounded());
        let text = plan.text();
        assert!(text.starts_with(RAG_SYSTEM_PROMPT));
        assert!(text.contains("Context 1:\nChill the dough for one hour."));
        assert!(text.ends_with("User Question: How long do I chill pie dough?"));
    }

    #[test]
    fn test_insufficient_uses_fallback() {
        let plan = compose_prompt(&decision(false, ""), "What is a roux?");
        assert_eq!(plan, PromptPlan::Fallback(NO_KNOWLEDGE_RESPONSE));
        assert!(!plan.is_grounded());
    }

    #[test]
    fn test_empty_context_uses_fallback() {
        let plan = compose_prompt(&decision(true, ""), "What is a roux?");
        assert!(!plan.is_grounded());
    }

    #[test]
    fn test_strict_mode_instructs_refusal() {
        let strict = GateDecision {
            mode: GateMode::Refuse,
            ..decision(false, "")
        };
        let plan = compose_prompt(&strict, "How do I make mole?");

        assert!(matches!(plan, PromptPlan::Refusal(_)));
        assert!(!plan.is_grounded());
        assert!(plan.text().contains("Do not answer from general knowledge."));
        assert!(plan.text().ends_with("User Question: How do I make mole?"));
    }
}

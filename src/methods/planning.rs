//! Plan-then-act prompting
//!
//! Stage 1 asks the model for a plan. Stage 2 renders a second prompt pair
//! with the plan injected as `plan`, `previous_output` and `output_1`, and its
//! reply is the row's completion.
//!
//! Per-sample states: `Init -> Stage1Sent -> Stage1Complete -> Stage2Sent -> Done`.
//! Any failure aborts the sample; there is no retry state.

use super::{generate_stage, MethodContext, MethodError, MethodRunner, SampleResult, StageResult};
use crate::model::{ChatModel, Message};
use crate::pipeline::RowMapping;
use crate::prompt::{safe_format, StagePrompts, TemplateError};
use async_trait::async_trait;
use tracing::debug;

const PREVIOUS_OUTPUT_SUFFIX: &str = "\n\n[PREVIOUS_OUTPUT]\n{plan}";

/// How stage-2 templates are chosen when no dedicated `_2` file exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageTwoFallback {
    /// Reuse the stage-1 system prompt; append the plan to the stage-1 user prompt
    AppendPreviousOutput,
    /// Reuse the stage-1 templates unchanged; stage 1 also honours its own files
    StageOneTemplates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlanState {
    Init,
    Stage1Sent,
    Stage1Complete,
    Stage2Sent,
    Done,
}

pub struct PlanningRunner {
    name: &'static str,
    fallback: StageTwoFallback,
    stage1: StagePrompts,
    stage2: StagePrompts,
}

impl PlanningRunner {
    pub fn new(name: &'static str, fallback: StageTwoFallback) -> Self {
        Self {
            name,
            fallback,
            stage1: StagePrompts::default(),
            stage2: StagePrompts::default(),
        }
    }

    fn advance(&self, state: &mut PlanState, next: PlanState) {
        debug!("{}: {:?} -> {:?}", self.name, state, next);
        *state = next;
    }

    fn stage1_templates<'a>(&'a self, system: &'a str, user: &'a str) -> (&'a str, &'a str) {
        (
            self.stage1.system.as_deref().unwrap_or(system),
            self.stage1.user.as_deref().unwrap_or(user),
        )
    }

    fn stage2_templates(&self, system: &str, user: &str) -> (String, String) {
        let system2 = self.stage2.system.as_deref().unwrap_or(system).to_string();
        let user2 = match (&self.stage2.user, self.fallback) {
            (Some(user2), _) => user2.clone(),
            (None, StageTwoFallback::AppendPreviousOutput) => format!("{}{}", user, PREVIOUS_OUTPUT_SUFFIX),
            (None, StageTwoFallback::StageOneTemplates) => user.to_string(),
        };
        (system2, user2)
    }
}

fn render_pair(
    system: &str,
    user: &str,
    mapping: &RowMapping,
) -> Result<(String, String), TemplateError> {
    let lookup = |key: &str| mapping.get(key);
    Ok((safe_format(system, lookup)?, safe_format(user, lookup)?))
}

#[async_trait]
impl MethodRunner for PlanningRunner {
    fn name(&self) -> &str {
        self.name
    }

    fn setup(&mut self, context: &MethodContext) -> Result<(), MethodError> {
        if self.fallback == StageTwoFallback::StageOneTemplates {
            self.stage1 = context.prompts.load_stage(&context.method, "")?;
        }
        self.stage2 = context.prompts.load_stage(&context.method, "_2")?;

        debug!(
            "{}: stage-2 system {}, user {}",
            self.name,
            if self.stage2.system.is_some() { "from file" } else { "fallback" },
            if self.stage2.user.is_some() { "from file" } else { "fallback" }
        );
        Ok(())
    }

    async fn run_sample(
        &self,
        mapping: &RowMapping,
        model: &dyn ChatModel,
        system_template: &str,
        user_template: &str,
        gen_max_new_tokens: Option<usize>,
    ) -> Result<SampleResult, MethodError> {
        let mut state = PlanState::Init;

        let (s1_system, s1_user) = self.stage1_templates(system_template, user_template);
        let (system1, user1) =
            render_pair(s1_system, s1_user, mapping).map_err(|source| MethodError::Template {
                stage: 1,
                partial: Vec::new(),
                source,
            })?;
        let messages1 = vec![Message::system(system1), Message::user(user1)];

        self.advance(&mut state, PlanState::Stage1Sent);
        let plan = generate_stage(model, self.name, &messages1, gen_max_new_tokens)
            .await
            .map_err(|source| MethodError::Generation {
                stage: 1,
                partial: Vec::new(),
                source,
            })?;
        self.advance(&mut state, PlanState::Stage1Complete);

        let stage1 = StageResult {
            stage: 1,
            messages: messages1,
            completion: plan,
        };

        let mut mapping2 = mapping.clone();
        mapping2.insert("plan", stage1.completion.as_str());
        mapping2.insert("output_1", stage1.completion.as_str());
        mapping2.insert("previous_output", stage1.completion.as_str());

        let (s2_system, s2_user) = self.stage2_templates(system_template, user_template);
        let (system2, user2) = match render_pair(&s2_system, &s2_user, &mapping2) {
            Ok(pair) => pair,
            Err(source) => {
                return Err(MethodError::Template {
                    stage: 2,
                    partial: vec![stage1],
                    source,
                })
            }
        };
        let messages2 = vec![Message::system(system2), Message::user(user2)];

        self.advance(&mut state, PlanState::Stage2Sent);
        let completion = match generate_stage(model, self.name, &messages2, gen_max_new_tokens).await {
            Ok(completion) => completion,
            Err(source) => {
                return Err(MethodError::Generation {
                    stage: 2,
                    partial: vec![stage1],
                    source,
                })
            }
        };
        self.advance(&mut state, PlanState::Done);

        let mut trace = stage1.messages.clone();
        trace.push(Message::assistant(stage1.completion.as_str()));
        trace.extend(messages2.iter().cloned());

        Ok(SampleResult {
            messages: trace,
            completion: completion.clone(),
            stages: vec![
                stage1,
                StageResult {
                    stage: 2,
                    messages: messages2,
                    completion,
                },
            ],
        })
    }

    fn cleanup(&mut self) {
        self.stage1 = StagePrompts::default();
        self.stage2 = StagePrompts::default();
    }
}

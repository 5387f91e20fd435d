//! Single-shot prompting: one system/user exchange per row

use super::{generate_stage, MethodContext, MethodError, MethodRunner, SampleResult, StageResult};
use crate::model::{ChatModel, Message};
use crate::pipeline::RowMapping;
use crate::prompt::safe_format;
use async_trait::async_trait;
use tracing::debug;

pub struct SingleShotRunner {
    name: &'static str,
}

impl SingleShotRunner {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl MethodRunner for SingleShotRunner {
    fn name(&self) -> &str {
        self.name
    }

    fn setup(&mut self, context: &MethodContext) -> Result<(), MethodError> {
        debug!("{} ready for {}", self.name, context.dataset_path.display());
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
        let render = |template: &str| {
            safe_format(template, |key| mapping.get(key)).map_err(|source| MethodError::Template {
                stage: 1,
                partial: Vec::new(),
                source,
            })
        };

        let messages = vec![
            Message::system(render(system_template)?),
            Message::user(render(user_template)?),
        ];

        let completion = generate_stage(model, self.name, &messages, gen_max_new_tokens)
            .await
            .map_err(|source| MethodError::Generation {
                stage: 1,
                partial: Vec::new(),
                source,
            })?;

        Ok(SampleResult {
            messages: messages.clone(),
            completion: completion.clone(),
            stages: vec![StageResult {
                stage: 1,
                messages,
                completion,
            }],
        })
    }

    fn cleanup(&mut self) {}
}

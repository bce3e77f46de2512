//! Entry point: generate one story and persist it in a single transaction.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::core::validator::{ROOT_PATH, check_tree_shape};
use crate::error::GenerationError;
use crate::io::config::{StoryConfig, load_config, write_config};
use crate::io::generator::{CommandGenerator, Generator};
use crate::io::prompt::PromptBuilder;
use crate::io::store::{StoryStore, StoryWriter};
use crate::materialize::Materializer;
use crate::repair::DocumentRepairLoop;
use crate::story::StoryRecord;

pub struct StoryGenerator<G: Generator> {
    generator: G,
    prompts: PromptBuilder,
    max_document_attempts: u32,
    default_theme: String,
}

impl StoryGenerator<CommandGenerator> {
    /// Build a generator backed by the configured local model command.
    pub fn from_config(config: &StoryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(CommandGenerator::new(&config.generator), config))
    }

    /// Load `config_path` (writing the defaults there first if it is missing)
    /// and open the configured generator and store.
    ///
    /// A relative `storage.database_path` resolves against the config file's
    /// directory.
    pub fn open(config_path: &Path) -> Result<(Self, StoryStore)> {
        if !config_path.exists() {
            write_config(config_path, &StoryConfig::default())?;
            info!(path = %config_path.display(), "wrote default config");
        }
        let config = load_config(config_path)?;
        let story_gen = Self::from_config(&config)?;

        let database_path = config_path
            .parent()
            .map_or_else(
                || config.storage.database_path.clone(),
                |dir| dir.join(&config.storage.database_path),
            );
        let store = StoryStore::open(&database_path)
            .with_context(|| format!("open story store {}", database_path.display()))?;
        Ok((story_gen, store))
    }
}

impl<G: Generator> StoryGenerator<G> {
    pub fn new(generator: G, config: &StoryConfig) -> Self {
        Self {
            generator,
            prompts: PromptBuilder::new(config.prompt_budget_bytes),
            max_document_attempts: config.max_document_attempts,
            default_theme: config.default_theme.clone(),
        }
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Generate a story for `theme` and store it under `session_id`.
    ///
    /// Either the whole tree is committed or nothing is.
    #[instrument(skip(self, store))]
    pub fn generate_story(
        &self,
        store: &mut StoryStore,
        session_id: &str,
        theme: &str,
    ) -> Result<StoryRecord, GenerationError> {
        let accepted =
            DocumentRepairLoop::new(&self.generator, &self.prompts, self.max_document_attempts)
                .run(self.prompts.initial(theme))?;
        check_tree_shape(&accepted.root, ROOT_PATH).map_err(GenerationError::Validation)?;

        let tx = store.begin()?;
        let story = tx.create_story(&accepted.title, session_id)?;
        Materializer::new(&self.generator, &self.prompts, &tx).materialize(
            story.id,
            &accepted.root,
            true,
        )?;
        tx.commit()?;

        info!(
            story_id = story.id,
            attempts = accepted.attempts,
            title = %story.title,
            "story generated"
        );
        Ok(story)
    }

    pub fn generate_story_with_default_theme(
        &self,
        store: &mut StoryStore,
        session_id: &str,
    ) -> Result<StoryRecord, GenerationError> {
        self.generate_story(store, session_id, &self.default_theme)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedGenerator, document_json, two_level_story};

    #[test]
    fn default_theme_reaches_the_prompt() {
        let generator = ScriptedGenerator::new(vec![Ok(document_json(
            "The Fork",
            &two_level_story(),
        ))]);
        let config = StoryConfig {
            default_theme: "haunted lighthouse".to_string(),
            ..StoryConfig::default()
        };
        let story_gen = StoryGenerator::new(generator, &config);
        let mut store = StoryStore::open_in_memory().expect("store");

        let story = story_gen
            .generate_story_with_default_theme(&mut store, "s1")
            .expect("story");

        assert_eq!(story.title, "The Fork");
        let requests = story_gen.generator().requests();
        assert_eq!(
            requests[0].user,
            "Create the story with this theme: haunted lighthouse"
        );
    }

    #[test]
    fn from_config_rejects_invalid_config() {
        let config = StoryConfig {
            max_document_attempts: 0,
            ..StoryConfig::default()
        };
        assert!(StoryGenerator::from_config(&config).is_err());
    }

    #[test]
    fn open_writes_default_config_and_creates_store() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("storygen.toml");

        let (_story_gen, store) = StoryGenerator::open(&config_path).expect("open");

        assert_eq!(load_config(&config_path).expect("load"), StoryConfig::default());
        assert!(temp.path().join("stories.db").exists());
        assert_eq!(store.count_stories().expect("count"), 0);
    }

    #[test]
    fn open_uses_configured_database_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("storygen.toml");
        std::fs::write(&config_path, "[storage]\ndatabase_path = \"data/tales.db\"\n")
            .expect("write");

        StoryGenerator::open(&config_path).expect("open");

        assert!(temp.path().join("data/tales.db").exists());
        assert!(!temp.path().join("stories.db").exists());
    }
}

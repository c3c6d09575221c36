use std::sync::Arc;

use captions_config::Settings;
use captions_orchestrator::{InMemoryPersistence, MeetingRegistry, PersistencePort, ProgressBroker};
use captions_transcription::{AsrClient, TranslationClient};

/// Shared application state, cloned (cheaply — every field is an `Arc`)
/// into every request handler.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub asr: Arc<AsrClient>,
    pub translator: Arc<TranslationClient>,
    pub broker: Arc<ProgressBroker>,
    pub meetings: Arc<MeetingRegistry<TranslationClient>>,
    pub persistence: Arc<dyn PersistencePort>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let settings = Arc::new(settings);
        let asr = Arc::new(AsrClient::new(settings.endpoints.asr_base_url.clone()));
        let translator = Arc::new(TranslationClient::new(settings.endpoints.translation_base_url.clone()));
        let persistence: Arc<dyn PersistencePort> = Arc::new(InMemoryPersistence::new());
        let meetings = Arc::new(MeetingRegistry::new(translator.clone(), persistence.clone()));

        Self {
            settings,
            asr,
            translator,
            broker: Arc::new(ProgressBroker::new()),
            meetings,
            persistence,
        }
    }
}

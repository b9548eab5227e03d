//! Translation is a read-only lookup outside the core (design note, §9);
//! the core only ever traffics in stable ids and calls through this trait
//! when a caller needs a display string. No implementation lives here.

pub trait Translator: Send + Sync {
    fn translate(&self, entity_id: &str, locale: &str) -> Option<String>;
}

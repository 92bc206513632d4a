//! Read-modify-write cycle over the stored configuration.
//!
//! Every mutation loads the document fresh, changes it in memory, writes it
//! back through a [`ConfigWriter`], has the server's tooling check it and
//! reloads the service. Nothing here serializes concurrent transactions:
//! two overlapping calls race and the last write wins, so callers that can
//! run in parallel must queue their calls.

use std::sync::Arc;

use crate::document::ConfigDocument;
use crate::error::{Error, Result};

pub trait ConfigReader: Send + Sync {
    fn read(&self) -> Result<String>;
}

pub trait ConfigWriter: Send + Sync {
    fn write(&self, text: &str) -> Result<()>;
    /// External syntax check of what was last written.
    fn validate_written(&self) -> bool;
    fn reload_service(&self) -> Result<()>;
}

pub struct ConfigTransaction {
    reader: Arc<dyn ConfigReader>,
    writer: Arc<dyn ConfigWriter>,
    logger: slog::Logger,
}

impl ConfigTransaction {
    pub fn new(
        reader: Arc<dyn ConfigReader>,
        writer: Arc<dyn ConfigWriter>,
        logger: slog::Logger,
    ) -> ConfigTransaction {
        ConfigTransaction {
            reader,
            writer,
            logger: logger.new(o!("module" => "transaction")),
        }
    }

    pub fn current(&self) -> Result<ConfigDocument> {
        ConfigDocument::load(&self.reader.read()?)
    }

    /// Run the server's check against what is currently stored.
    pub fn validate_stored(&self) -> bool {
        self.writer.validate_written()
    }

    /// Apply `mutation` to the stored document.
    ///
    /// An error from `mutation` aborts before anything is written. On
    /// success returns the mutation's value and the document as re-read
    /// after the write.
    pub fn apply_mutation<T, F>(&self, mutation: F) -> Result<(T, ConfigDocument)>
    where
        F: FnOnce(&mut ConfigDocument) -> Result<T>,
    {
        let previous = self.reader.read()?;
        let mut doc = ConfigDocument::load(&previous)?;
        let value = mutation(&mut doc)?;
        let stored = self.persist(&previous, &doc)?;
        Ok((value, stored))
    }

    /// Replace the whole stored document.
    pub fn replace(&self, doc: &ConfigDocument) -> Result<ConfigDocument> {
        let previous = self.reader.read()?;
        self.persist(&previous, doc)
    }

    fn persist(&self, previous: &str, doc: &ConfigDocument) -> Result<ConfigDocument> {
        let doc = ConfigDocument::from_value(doc.to_value()?)?;
        let text = doc.render()?;

        if let Err(err) = self.writer.write(&text) {
            error!(self.logger, "Failed writing configuration: {}", err);
            return Err(err);
        }
        if !self.writer.validate_written() {
            warn!(self.logger, "Written configuration rejected, restoring previous");
            if let Err(err) = self.writer.write(previous) {
                error!(self.logger, "Failed restoring previous configuration: {}", err);
            }
            return Err(Error::ValidationFailed(
                "server rejected the new configuration".to_string(),
            ));
        }
        if let Err(err) = self.writer.reload_service() {
            error!(self.logger, "Failed reloading service: {}", err);
            return Err(err);
        }

        info!(self.logger, "Configuration updated"; "bytes" => text.len());
        self.current()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::document::tests::SAMPLE;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Configuration held in memory, with switchable validate/reload outcomes.
    pub(crate) struct MemoryStore {
        pub(crate) text: Mutex<String>,
        pub(crate) valid: AtomicBool,
        pub(crate) reload_ok: AtomicBool,
        pub(crate) writes: AtomicUsize,
        pub(crate) reloads: AtomicUsize,
    }

    impl MemoryStore {
        pub(crate) fn new(text: &str) -> Arc<MemoryStore> {
            Arc::new(MemoryStore {
                text: Mutex::new(text.to_string()),
                valid: AtomicBool::new(true),
                reload_ok: AtomicBool::new(true),
                writes: AtomicUsize::new(0),
                reloads: AtomicUsize::new(0),
            })
        }

        pub(crate) fn text(&self) -> String {
            self.text.lock().unwrap().clone()
        }
    }

    impl ConfigReader for MemoryStore {
        fn read(&self) -> Result<String> {
            Ok(self.text())
        }
    }

    impl ConfigWriter for MemoryStore {
        fn write(&self, text: &str) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            *self.text.lock().unwrap() = text.to_string();
            Ok(())
        }

        fn validate_written(&self) -> bool {
            self.valid.load(Ordering::SeqCst)
        }

        fn reload_service(&self) -> Result<()> {
            self.reloads.fetch_add(1, Ordering::SeqCst);
            if self.reload_ok.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(Error::Command {
                    command: "reload".to_string(),
                    output: "failed".to_string(),
                })
            }
        }
    }

    pub(crate) fn transaction(store: &Arc<MemoryStore>) -> ConfigTransaction {
        let logger = slog::Logger::root(slog::Discard, o!());
        ConfigTransaction::new(store.clone(), store.clone(), logger)
    }

    #[test]
    fn mutation_is_written_and_reread() {
        let store = MemoryStore::new(SAMPLE);
        let tx = transaction(&store);
        let (count, doc) = tx
            .apply_mutation(|doc| {
                doc.first_subnet_mut().reservations.clear();
                Ok(doc.subnets().len())
            })
            .unwrap();
        assert_eq!(count, 2);
        assert!(doc.first_subnet().reservations.is_empty());
        assert!(!store.text().contains("printer"));
        assert_eq!(store.reloads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_mutation_writes_nothing() {
        let store = MemoryStore::new(SAMPLE);
        let tx = transaction(&store);
        let res: Result<((), ConfigDocument)> =
            tx.apply_mutation(|_| Err(Error::NotFound("x".to_string())));
        assert!(matches!(res, Err(Error::NotFound(_))));
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
        assert_eq!(store.text(), SAMPLE);
    }

    #[test]
    fn rejected_write_is_rolled_back() {
        let store = MemoryStore::new(SAMPLE);
        store.valid.store(false, Ordering::SeqCst);
        let tx = transaction(&store);
        let res = tx.apply_mutation(|doc| {
            doc.first_subnet_mut().reservations.clear();
            Ok(())
        });
        assert!(matches!(res, Err(Error::ValidationFailed(_))));
        assert_eq!(store.text(), SAMPLE);
        assert_eq!(store.writes.load(Ordering::SeqCst), 2);
        assert_eq!(store.reloads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reload_failure_is_reported() {
        let store = MemoryStore::new(SAMPLE);
        store.reload_ok.store(false, Ordering::SeqCst);
        let tx = transaction(&store);
        let res = tx.apply_mutation(|_| Ok(()));
        assert!(matches!(res, Err(Error::Command { .. })));
    }

    #[test]
    fn malformed_stored_config_is_reported() {
        let store = MemoryStore::new("{ \"Dhcp4\": { \"subnet4\": [] } }");
        let tx = transaction(&store);
        assert!(matches!(
            tx.apply_mutation(|_| Ok(())),
            Err(Error::MalformedConfig(_))
        ));
        assert!(matches!(tx.current(), Err(Error::MalformedConfig(_))));
    }
}

//! Saving and restoring the raw memory region.
//!
//! An image is the region byte for byte. Loading validates the system
//! sector and walks the data sector before the image replaces anything.

use std::fs;
use std::io::Write;
use std::path::Path;

use tracing::info;

use crate::controller::Controller;
use crate::error::Result;
use crate::memory::Memory;

impl Controller {
    /// Write the memory region to `path`.
    pub fn save_image(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut file = fs::File::create(path)?;
        file.write_all(self.memory().as_bytes())?;
        file.sync_all()?;
        info!(path = %path.display(), bytes = self.memory().len(), "image saved");
        Ok(())
    }

    /// Read an image from `path` into a new controller.
    pub fn load_image(path: impl AsRef<Path>, monitor_capacity: usize) -> Result<Self> {
        let path = path.as_ref();
        let memory = Memory::from_bytes(fs::read(path)?)?;
        info!(
            path = %path.display(),
            id = memory.system_sector().id,
            bytes = memory.len(),
            "image loaded"
        );
        Ok(Self::from_memory(memory, monitor_capacity))
    }
}

#[cfg(test)]
mod tests {
    use crate::controller::Controller;
    use crate::error::CoreError;
    use crate::library::{logic, LOGIC_LIBRARY};
    use crate::memory::ControllerConfig;

    #[test]
    fn round_trip_preserves_program() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("controller.img");

        let mut controller = Controller::new(&ControllerConfig::default()).unwrap();
        let not = controller
            .create_function_block(LOGIC_LIBRARY, logic::NOT, None, None, None, None, None)
            .unwrap();
        let task = controller.create_task(not, 10.0, 0.0, None).unwrap();
        controller.tick(10.0);
        controller.save_image(&path).unwrap();

        let mut loaded = Controller::load_image(&path, 10).unwrap();
        assert_eq!(loaded.memory().as_bytes(), controller.memory().as_bytes());
        assert_eq!(loaded.task_data(task).unwrap().run_count, 1);
        assert_eq!(loaded.io_values(not).unwrap(), vec![0.0, 1.0]);

        loaded.tick(10.0);
        assert_eq!(loaded.task_data(task).unwrap().run_count, 2);
    }

    #[test]
    fn rejects_missing_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Controller::load_image(dir.path().join("missing"), 10),
            Err(CoreError::Io(_))
        ));

        let path = dir.path().join("garbage.img");
        std::fs::write(&path, [0u8; 64]).unwrap();
        assert!(matches!(
            Controller::load_image(&path, 10),
            Err(CoreError::CorruptImage(_))
        ));
    }

    fn patched_image(dir: &std::path::Path, at: usize, word: u32) -> std::path::PathBuf {
        let config = ControllerConfig {
            mem_size: 4096,
            ..ControllerConfig::default()
        };
        let controller = Controller::new(&config).unwrap();
        let path = dir.join("patched.img");
        controller.save_image(&path).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[at..at + 4].copy_from_slice(&word.to_le_bytes());
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn oversized_sector_words_are_rejected() {
        let dir = tempfile::tempdir().unwrap();

        // taskListLength large enough to overflow the data sector pointer
        let path = patched_image(dir.path(), 36, 0x4000_0000);
        assert!(matches!(
            Controller::load_image(&path, 10),
            Err(CoreError::CorruptImage(_))
        ));

        // dataMemSize past the end of the image
        let path = patched_image(dir.path(), 12, u32::MAX);
        assert!(matches!(
            Controller::load_image(&path, 10),
            Err(CoreError::CorruptImage(_))
        ));

        // lastUsedId beyond the table
        let path = patched_image(dir.path(), 24, u32::MAX);
        assert!(matches!(
            Controller::load_image(&path, 10),
            Err(CoreError::CorruptImage(_))
        ));
    }
}

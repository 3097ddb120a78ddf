//! Menu actions backed by the real camera and preview window.

use crate::config::Config;
use crate::dataset::FaceStore;
use crate::menu::Actions;
use crate::registry::Registry;
use crate::workflow::{self, WorkflowError};
use anyhow::Context;
use facereg_core::CascadeDetector;
use facereg_hw::{Camera, Display};
use std::io::Write;

pub struct App {
    config: Config,
    registry: Registry,
    store: FaceStore,
    detector: CascadeDetector,
}

impl App {
    pub fn new(config: Config, registry: Registry, detector: CascadeDetector) -> Self {
        let store = FaceStore::new(&config.base_dir);
        Self {
            config,
            registry,
            store,
            detector,
        }
    }

    /// Open the camera and a preview window sized to its frames.
    fn open_devices(&self, title: &str) -> anyhow::Result<(Camera, Display)> {
        let camera = Camera::open(&self.config.camera_device)
            .with_context(|| format!("failed to open camera {}", self.config.camera_device))?;
        let font = self.config.font_path.as_deref();
        let display = Display::open(title, camera.width, camera.height, font)
            .context("failed to open preview window")?;
        Ok((camera, display))
    }
}

impl Actions for App {
    fn register(&mut self, name: &str, age: &str, out: &mut dyn Write) -> anyhow::Result<()> {
        if FaceStore::validate_name(name).is_err() {
            return Err(WorkflowError::InvalidName(name.to_string()).into());
        }

        let (mut camera, mut display) = self.open_devices("Registration")?;
        writeln!(
            out,
            "Look at the camera. Capturing {} photos, press 'q' to stop early.",
            self.config.photos_per_session
        )?;

        let summary = workflow::register(
            &mut camera,
            &mut display,
            &self.detector,
            &self.store,
            &mut self.registry,
            &self.config,
            name,
            age,
        )?;

        tracing::debug!(
            name = %summary.name,
            new_photos = summary.new_photos,
            "registration finished"
        );
        writeln!(out, "Registration complete! Total photos: {}", summary.total_photos)?;
        Ok(())
    }

    fn recognize(&mut self, out: &mut dyn Write) -> anyhow::Result<()> {
        let Some(model) = workflow::train(&self.store, &self.registry)? else {
            writeln!(out, "No one registered!")?;
            return Ok(());
        };

        let (mut camera, mut display) = self.open_devices("Recognition")?;
        writeln!(out, "Recognizing. Press 'q' to return to the menu.")?;

        workflow::recognize(
            &mut camera,
            &mut display,
            &self.detector,
            &model,
            &self.registry,
            &self.config,
        );

        writeln!(out, "Recognition finished.")?;
        Ok(())
    }
}

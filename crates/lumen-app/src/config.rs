// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use lumen_render_vk::{PresentMode, Validation};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AppCfg {
    pub render: RenderCfg,
    pub cache: CacheCfg,
    pub window: WindowCfg,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub present_mode: PresentModeCfg,
    /// Unset means "debug builds only".
    pub validation: Option<ValidationCfg>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            present_mode: PresentModeCfg::Mailbox,
            validation: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeCfg {
    #[default]
    Mailbox,
    Fifo,
    Immediate,
}

impl From<PresentModeCfg> for PresentMode {
    fn from(cfg: PresentModeCfg) -> Self {
        match cfg {
            PresentModeCfg::Mailbox => PresentMode::Mailbox,
            PresentModeCfg::Fifo => PresentMode::Fifo,
            PresentModeCfg::Immediate => PresentMode::Immediate,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationCfg {
    Off,
    Auto,
    Required,
}

impl From<ValidationCfg> for Validation {
    fn from(cfg: ValidationCfg) -> Self {
        match cfg {
            ValidationCfg::Off => Validation::Off,
            ValidationCfg::Auto => Validation::IfAvailable,
            ValidationCfg::Required => Validation::Required,
        }
    }
}

impl RenderCfg {
    /// `--validation` on the command line wins over the file.
    pub fn validation(&self, forced: bool) -> Validation {
        if forced {
            return Validation::Required;
        }
        self.validation.map(Validation::from).unwrap_or_default()
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheCfg {
    pub texture_dir: PathBuf,
}

impl Default for CacheCfg {
    fn default() -> Self {
        Self {
            texture_dir: PathBuf::from("cache/textures"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WindowCfg {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            title: "lumen".into(),
        }
    }
}

fn default_clear() -> [f32; 4] {
    [0.01, 0.01, 0.01, 1.0]
}

pub fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str(text)
}

/// Missing file: defaults. Unreadable or malformed file: warning, then defaults.
pub fn load_cfg(path: &Path) -> AppCfg {
    let text = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("no config at {}, using defaults", path.display());
            return AppCfg::default();
        }
        Err(e) => {
            warn!("can't read {}: {e}; using defaults", path.display());
            return AppCfg::default();
        }
    };
    match parse_cfg(&text) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("malformed {}: {e}; using defaults", path.display());
            AppCfg::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = parse_cfg("").unwrap();
        assert_eq!(cfg.render.clear_color, default_clear());
        assert_eq!(cfg.render.present_mode, PresentModeCfg::Mailbox);
        assert_eq!(cfg.render.validation, None);
        assert_eq!(cfg.window.width, 1280);
        assert_eq!(cfg.window.title, "lumen");
        assert_eq!(cfg.cache.texture_dir, PathBuf::from("cache/textures"));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = parse_cfg(
            r#"
            [render]
            present_mode = "fifo"
            validation = "required"

            [window]
            width = 640
            "#,
        )
        .unwrap();
        assert_eq!(cfg.render.present_mode, PresentModeCfg::Fifo);
        assert_eq!(cfg.render.validation(false), Validation::Required);
        assert_eq!(cfg.render.clear_color, default_clear());
        assert_eq!(cfg.window.width, 640);
        assert_eq!(cfg.window.height, 720);
    }

    #[test]
    fn unknown_present_mode_is_an_error() {
        assert!(parse_cfg("[render]\npresent_mode = \"vsync\"\n").is_err());
    }

    #[test]
    fn cli_flag_forces_validation() {
        let cfg = parse_cfg("[render]\nvalidation = \"off\"\n").unwrap();
        assert_eq!(cfg.render.validation(false), Validation::Off);
        assert_eq!(cfg.render.validation(true), Validation::Required);
    }

    #[test]
    fn present_modes_map_one_to_one() {
        assert_eq!(PresentMode::from(PresentModeCfg::Fifo), PresentMode::Fifo);
        assert_eq!(PresentMode::from(PresentModeCfg::Immediate), PresentMode::Immediate);
        assert_eq!(PresentMode::from(PresentModeCfg::Mailbox), PresentMode::Mailbox);
    }

    #[test]
    fn missing_and_malformed_files_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let missing = load_cfg(&dir.path().join("absent.toml"));
        assert_eq!(missing.window.width, 1280);

        let bad = dir.path().join("bad.toml");
        fs::write(&bad, "[render\nclear_color = 3").unwrap();
        let cfg = load_cfg(&bad);
        assert_eq!(cfg.render.clear_color, default_clear());

        let good = dir.path().join("good.toml");
        fs::write(&good, "[cache]\ntexture_dir = \"tex\"\n").unwrap();
        assert_eq!(load_cfg(&good).cache.texture_dir, PathBuf::from("tex"));
    }
}

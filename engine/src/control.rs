//! Line-oriented control surface. Each line is one command; settings
//! commands go straight to the shared [`SettingsHandle`] and report any
//! clamping as status text.

use schlieren_common::settings::{
    Adjustment, Colormap, CropRegion, FilterKind, SettingsHandle, UnknownName, UpdatePolicy,
};
use std::str::FromStr;

pub const HELP: &str = "\
commands:
  filter <name>          gaussian_blur|median_filter|bilateral_filter|sobel_edges
                         laplacian_edges|unsharp_mask|ratio
  param <value>          filter parameter
  gain <value>           0.1 .. 100
  colormap <name>        none|jet|hot|bone|viridis|inferno|turbo
  interval <frames>      reference update interval, 0 = frozen
  alpha <0..1>           blend weight of the current frame
  policy <blend|replace>
  crop <w> <h> | crop off
  snap                   save the current processed frame
  status
  quit";

#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    Filter(FilterKind),
    Param(f64),
    Gain(f64),
    Colormap(Colormap),
    Interval(i64),
    Alpha(f64),
    Policy(UpdatePolicy),
    Crop(Option<CropRegion>),
    Snapshot,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ControlError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}' (try 'help')")]
    UnknownCommand(String),
    #[error("'{command}' needs {expected}")]
    MissingArgument {
        command: &'static str,
        expected: &'static str,
    },
    #[error("'{command}': '{value}' is not a valid {expected}")]
    InvalidArgument {
        command: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error(transparent)]
    UnknownName(#[from] UnknownName),
}

impl FromStr for ControlCommand {
    type Err = ControlError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = words.next().ok_or(ControlError::Empty)?.to_ascii_lowercase();
        let rest: Vec<&str> = words.collect();
        let first = rest.first().copied();

        let cmd = match command.as_str() {
            "filter" | "f" => {
                // Accept "filter gaussian blur" as well as "filter gaussian_blur".
                let name = rest.join("_");
                if name.is_empty() {
                    return Err(missing("filter", "a filter name"));
                }
                ControlCommand::Filter(name.parse()?)
            }
            "param" | "p" => ControlCommand::Param(number("param", first)?),
            "gain" | "g" => ControlCommand::Gain(number("gain", first)?),
            "colormap" | "cmap" | "c" => {
                let name = first.ok_or(missing("colormap", "a colormap name"))?;
                ControlCommand::Colormap(name.parse()?)
            }
            "interval" | "i" => {
                let value = first.ok_or(missing("interval", "a frame count"))?;
                let interval = value.parse().map_err(|_| ControlError::InvalidArgument {
                    command: "interval",
                    value: value.to_string(),
                    expected: "integer",
                })?;
                ControlCommand::Interval(interval)
            }
            "alpha" | "a" => ControlCommand::Alpha(number("alpha", first)?),
            "policy" => {
                let policy = first.ok_or(missing("policy", "blend or replace"))?;
                ControlCommand::Policy(policy.parse()?)
            }
            "crop" => match rest.as_slice() {
                ["off"] | ["none"] => ControlCommand::Crop(None),
                [w, h] => ControlCommand::Crop(Some(CropRegion {
                    width: dimension(w)?,
                    height: dimension(h)?,
                })),
                _ => return Err(missing("crop", "<width> <height> or 'off'")),
            },
            "snap" | "snapshot" | "s" => ControlCommand::Snapshot,
            "status" => ControlCommand::Status,
            "help" | "h" | "?" => ControlCommand::Help,
            "quit" | "exit" | "q" => ControlCommand::Quit,
            _ => return Err(ControlError::UnknownCommand(command)),
        };
        Ok(cmd)
    }
}

impl ControlCommand {
    /// Apply a settings command, returning the status text to show.
    /// Commands that are not settings changes return `None` and are left
    /// to the caller.
    pub fn apply(&self, settings: &SettingsHandle) -> Option<String> {
        let (done, adjustment) = match *self {
            ControlCommand::Filter(kind) => {
                let adjustment = settings.set_filter(kind);
                (format!("filter set to {kind}"), adjustment)
            }
            ControlCommand::Param(v) => (String::new(), settings.set_param(v)),
            ControlCommand::Gain(v) => (String::new(), settings.set_gain(v)),
            ControlCommand::Colormap(map) => {
                settings.set_colormap(map);
                (format!("colormap set to {map}"), None)
            }
            ControlCommand::Interval(n) => (String::new(), settings.set_update_interval(n)),
            ControlCommand::Alpha(v) => (String::new(), settings.set_alpha(v)),
            ControlCommand::Policy(policy) => {
                settings.set_policy(policy);
                (format!("reference policy set to {policy:?}"), None)
            }
            ControlCommand::Crop(crop) => {
                settings.set_crop(crop);
                let text = match crop {
                    Some(c) => format!("crop set to {}x{}", c.width, c.height),
                    None => "crop disabled".to_string(),
                };
                (text, None)
            }
            ControlCommand::Snapshot
            | ControlCommand::Status
            | ControlCommand::Help
            | ControlCommand::Quit => return None,
        };
        Some(describe(done, adjustment, settings))
    }
}

fn describe(done: String, adjustment: Option<Adjustment>, settings: &SettingsHandle) -> String {
    let current = settings.snapshot();
    let summary = format!(
        "{} param={} gain={} colormap={} interval={} alpha={}",
        current.filter.kind(),
        current.filter.param(),
        current.compositor.gain,
        current.compositor.colormap,
        current.reference.update_interval,
        current.reference.alpha,
    );
    match (done.is_empty(), adjustment) {
        (_, Some(adj)) => format!("{adj} ({summary})"),
        (true, None) => summary,
        (false, None) => format!("{done} ({summary})"),
    }
}

fn missing(command: &'static str, expected: &'static str) -> ControlError {
    ControlError::MissingArgument { command, expected }
}

fn number(command: &'static str, value: Option<&str>) -> Result<f64, ControlError> {
    let value = value.ok_or(missing(command, "a number"))?;
    value.parse().map_err(|_| ControlError::InvalidArgument {
        command,
        value: value.to_string(),
        expected: "number",
    })
}

fn dimension(value: &str) -> Result<u32, ControlError> {
    value.parse().map_err(|_| ControlError::InvalidArgument {
        command: "crop",
        value: value.to_string(),
        expected: "pixel count",
    })
}

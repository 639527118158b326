//! Pointer, wheel, key and slider input mapped onto render parameters.

use crate::render::{DiffChannel, Palette, RenderParameters, ViewMode};

const THRESHOLD_STEP: f32 = 0.01;
const BLEND_STEP: f32 = 0.05;
const NUDGE_STEP: f32 = 0.01;
const RADIUS_STEP: f32 = 0.01;
const TILE_STEP: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    Char(char),
    ArrowLeft,
    ArrowRight,
    ArrowUp,
    ArrowDown,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InputEvent {
    /// Pointer position, normalized to the canvas.
    Pointer { x: f32, y: f32 },
    /// Wheel ticks; positive scrolls up.
    Wheel(f32),
    Key(Key),
    Mode(ViewMode),
    Threshold(f32),
    Blend(f32),
    TileSize(u32),
    Radius(f32),
    Palette(Palette),
    Channel(DiffChannel),
    Gpu(bool),
}

/// What a key does.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Action {
    SetMode(ViewMode),
    AdjustThreshold(f32),
    AdjustBlend(f32),
    CyclePalette,
    ToggleChannel,
    ToggleGpu,
    Nudge(f32, f32),
}

pub fn action_for_key(key: Key) -> Option<Action> {
    let action = match key {
        Key::Char(c @ '1'..='5') => {
            let i = c as usize - '1' as usize;
            Action::SetMode(ViewMode::ALL[i])
        }
        Key::Char('[') => Action::AdjustThreshold(-THRESHOLD_STEP),
        Key::Char(']') => Action::AdjustThreshold(THRESHOLD_STEP),
        Key::Char('-') => Action::AdjustBlend(-BLEND_STEP),
        Key::Char('=') => Action::AdjustBlend(BLEND_STEP),
        Key::Char('p') => Action::CyclePalette,
        Key::Char('l') => Action::ToggleChannel,
        Key::Char('g') => Action::ToggleGpu,
        Key::ArrowLeft => Action::Nudge(-NUDGE_STEP, 0.0),
        Key::ArrowRight => Action::Nudge(NUDGE_STEP, 0.0),
        Key::ArrowUp => Action::Nudge(0.0, -NUDGE_STEP),
        Key::ArrowDown => Action::Nudge(0.0, NUDGE_STEP),
        Key::Char(_) => return None,
    };
    Some(action)
}

/// Outcome of applying one event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Parameters changed; render again.
    Redraw,
    /// Switch the compositor backend preference.
    SetGpu(Option<bool>),
    Ignored,
}

/// Apply `event` to `params`, leaving every field clamped.
pub fn apply(params: &mut RenderParameters, event: InputEvent) -> Effect {
    match event {
        InputEvent::Pointer { x, y } => {
            params.split = x;
            params.circle_center = (x, y);
        }
        InputEvent::Wheel(ticks) => match params.mode {
            ViewMode::CircleReveal => params.circle_radius += ticks * RADIUS_STEP,
            ViewMode::Checkerboard => {
                let step = (ticks.abs().round() as u32).max(1) * TILE_STEP;
                params.tile_size = if ticks > 0.0 {
                    params.tile_size.saturating_add(step)
                } else {
                    params.tile_size.saturating_sub(step)
                };
            }
            _ => params.threshold += ticks * THRESHOLD_STEP,
        },
        InputEvent::Key(key) => match action_for_key(key) {
            Some(Action::ToggleGpu) => return Effect::SetGpu(None),
            Some(action) => perform(params, action),
            None => return Effect::Ignored,
        },
        InputEvent::Mode(mode) => params.mode = mode,
        InputEvent::Threshold(v) => params.threshold = v,
        InputEvent::Blend(v) => params.blend = v,
        InputEvent::TileSize(v) => params.tile_size = v,
        InputEvent::Radius(v) => params.circle_radius = v,
        InputEvent::Palette(p) => params.palette = p,
        InputEvent::Channel(c) => params.channel = c,
        InputEvent::Gpu(on) => return Effect::SetGpu(Some(on)),
    }
    *params = params.clamped();
    Effect::Redraw
}

fn perform(params: &mut RenderParameters, action: Action) {
    match action {
        Action::SetMode(mode) => params.mode = mode,
        Action::AdjustThreshold(step) => params.threshold += step,
        Action::AdjustBlend(step) => params.blend += step,
        Action::CyclePalette => params.palette = params.palette.next(),
        Action::ToggleChannel => params.channel = params.channel.toggled(),
        Action::Nudge(dx, dy) => match params.mode {
            ViewMode::CircleReveal => {
                params.circle_center = (params.circle_center.0 + dx, params.circle_center.1 + dy);
            }
            _ => params.split += dx,
        },
        Action::ToggleGpu => {}
    }
}

use crate::geometry::Point;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Button {
    Left,
    Right,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Modifiers {
    /// Pan and zoom.
    pub control: bool,
    /// Vertex delete in edit mode.
    pub shift: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        control: false,
        shift: false,
    };
    pub const CONTROL: Modifiers = Modifiers {
        control: true,
        shift: false,
    };
    pub const SHIFT: Modifiers = Modifiers {
        control: false,
        shift: true,
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    Enter,
    Escape,
    Delete,
}

/// Pointer and keyboard input. Positions are in widget (screen) pixels; the
/// editor maps them to image space through its [`Viewport`](super::Viewport).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InputEvent {
    Press {
        pos: Point,
        button: Button,
        modifiers: Modifiers,
    },
    Move {
        pos: Point,
        modifiers: Modifiers,
    },
    Release {
        pos: Point,
        button: Button,
        modifiers: Modifiers,
    },
    DoubleClick {
        pos: Point,
        button: Button,
        modifiers: Modifiers,
    },
    /// `delta > 0` zooms in.
    Wheel {
        pos: Point,
        delta: f64,
        modifiers: Modifiers,
    },
    Key(Key),
}

impl InputEvent {
    pub fn press(x: f64, y: f64) -> Self {
        InputEvent::Press {
            pos: Point::new(x, y),
            button: Button::Left,
            modifiers: Modifiers::NONE,
        }
    }

    pub fn right_press(x: f64, y: f64) -> Self {
        InputEvent::Press {
            pos: Point::new(x, y),
            button: Button::Right,
            modifiers: Modifiers::NONE,
        }
    }

    pub fn moved(x: f64, y: f64) -> Self {
        InputEvent::Move {
            pos: Point::new(x, y),
            modifiers: Modifiers::NONE,
        }
    }

    pub fn release(x: f64, y: f64) -> Self {
        InputEvent::Release {
            pos: Point::new(x, y),
            button: Button::Left,
            modifiers: Modifiers::NONE,
        }
    }

    pub fn double_click(x: f64, y: f64) -> Self {
        InputEvent::DoubleClick {
            pos: Point::new(x, y),
            button: Button::Left,
            modifiers: Modifiers::NONE,
        }
    }
}

//! SDL2 preview window.
//! Shows every live frame and puts the HUD text in the title bar.
//! `q`, Escape or closing the window count as a quit request.

use sdl2::event::Event;
use sdl2::keyboard::Keycode;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use sdl2::EventPump;
use tracing::info;

use super::{Hud, Overlay};
use crate::capture::{Frame, PixelFormat};
use crate::error::SinkError;

const TITLE: &str = "Preview";

pub struct Sdl2Display {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    event_pump: EventPump,
    format: PixelFormat,
    title: String,
}

impl Sdl2Display {
    pub fn new(
        sdl_context: &sdl2::Sdl,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self, SinkError> {
        let video_subsystem = sdl_context.video().map_err(SinkError::Display)?;

        let window = video_subsystem
            .window(TITLE, width, height)
            .position_centered()
            .resizable()
            .build()
            .map_err(|e| SinkError::Display(e.to_string()))?;

        let canvas = window
            .into_canvas()
            .present_vsync()
            .build()
            .map_err(|e| SinkError::Display(e.to_string()))?;
        let texture_creator = canvas.texture_creator();
        let event_pump = sdl_context.event_pump().map_err(SinkError::Display)?;

        Ok(Self {
            canvas,
            texture_creator,
            event_pump,
            format,
            title: TITLE.to_string(),
        })
    }

    fn pixel_format(&self, channels: u8) -> Result<PixelFormatEnum, SinkError> {
        match (channels, self.format) {
            (3, PixelFormat::Rgb24) => Ok(PixelFormatEnum::RGB24),
            (3, _) => Ok(PixelFormatEnum::BGR24),
            (channels, _) => Err(SinkError::UnsupportedChannels { channels }),
        }
    }
}

impl Overlay for Sdl2Display {
    fn render(&mut self, frame: &Frame, hud: &Hud<'_>) -> Result<(), SinkError> {
        let pixel_format = self.pixel_format(frame.channels)?;

        let mut texture = self
            .texture_creator
            .create_texture_streaming(pixel_format, frame.width, frame.height)
            .map_err(|e| SinkError::Display(e.to_string()))?;

        texture
            .update(None, frame.data(), frame.stride())
            .map_err(|e| SinkError::Display(e.to_string()))?;

        self.canvas.clear();
        self.canvas
            .copy(&texture, None, None)
            .map_err(SinkError::Display)?;
        self.canvas.present();

        let lines = hud.lines();
        let title = if lines.is_empty() {
            TITLE.to_string()
        } else {
            format!("{TITLE} - {}", lines.join(" | "))
        };
        if title != self.title {
            self.canvas
                .window_mut()
                .set_title(&title)
                .map_err(|e| SinkError::Display(e.to_string()))?;
            self.title = title;
        }
        Ok(())
    }

    fn quit_requested(&mut self) -> bool {
        let mut quit = false;
        for event in self.event_pump.poll_iter() {
            match event {
                Event::Quit { .. } => quit = true,
                Event::KeyDown { keycode, .. }
                    if keycode == Some(Keycode::Q) || keycode == Some(Keycode::Escape) =>
                {
                    quit = true
                }
                _ => {}
            }
        }
        if quit {
            info!("Quit requested from preview window");
        }
        quit
    }
}

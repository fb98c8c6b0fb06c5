//! Motion-JPEG recording: concatenated baseline JPEGs in one file.

use std::fs::File;
use std::io::{BufWriter, Write};

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

use super::{VideoWriter, WriterSpec};
use crate::frame::encode_jpeg;

pub struct MjpegFileWriter {
    out: BufWriter<File>,
    width: u32,
    height: u32,
    quality: u8,
    frames: u64,
}

impl MjpegFileWriter {
    pub fn create(spec: &WriterSpec, quality: u8) -> Result<Self> {
        let file = File::create(&spec.path)
            .with_context(|| format!("create recording {}", spec.path.display()))?;
        Ok(Self {
            out: BufWriter::new(file),
            width: spec.width,
            height: spec.height,
            quality,
            frames: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }
}

impl VideoWriter for MjpegFileWriter {
    fn write(&mut self, frame: &RgbImage) -> Result<()> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(anyhow!(
                "frame is {}x{}, recording is {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            ));
        }
        let jpeg = encode_jpeg(frame, self.quality)?;
        self.out.write_all(&jpeg)?;
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

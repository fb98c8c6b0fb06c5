use std::io::Cursor;
use std::sync::mpsc;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use image::{GrayImage, ImageFormat};
use leptess::{LepTess, Variable};

use super::OcrEngine;

/// Page segmentation mode 7: treat the image as a single text line.
const PSM_SINGLE_LINE: &str = "7";

type Job = (GrayImage, mpsc::Sender<Result<String>>);

/// Tesseract via leptess.
///
/// The `LepTess` handle is created on and never leaves a dedicated worker
/// thread; callers hand it plate crops over a channel. Plate crops are small,
/// so requests from concurrent frame streams queue only briefly.
pub struct TesseractOcr {
    jobs: Mutex<mpsc::Sender<Job>>,
}

impl TesseractOcr {
    /// `tessdata` overrides the system tessdata directory.
    pub fn new(tessdata: Option<&str>) -> Result<Self> {
        log::info!("initializing tesseract (datapath: {:?})", tessdata);
        let tessdata = tessdata.map(str::to_string);
        let (jobs, queue) = mpsc::channel::<Job>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);

        std::thread::Builder::new()
            .name("tesseract".into())
            .spawn(move || {
                let mut tess = match init_tesseract(tessdata.as_deref()) {
                    Ok(tess) => {
                        let _ = ready_tx.send(Ok(()));
                        tess
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                for (image, reply) in queue {
                    let _ = reply.send(read_line(&mut tess, &image));
                }
            })?;

        ready_rx
            .recv()
            .map_err(|_| anyhow!("tesseract worker exited during startup"))??;
        Ok(Self {
            jobs: Mutex::new(jobs),
        })
    }
}

impl OcrEngine for TesseractOcr {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn recognize(&self, image: &GrayImage) -> Result<String> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.jobs
            .lock()
            .map_err(|_| anyhow!("tesseract queue lock poisoned"))?
            .send((image.clone(), reply_tx))
            .map_err(|_| anyhow!("tesseract worker is gone"))?;
        reply_rx
            .recv()
            .map_err(|_| anyhow!("tesseract worker dropped the request"))?
    }
}

fn init_tesseract(tessdata: Option<&str>) -> Result<LepTess> {
    let mut tess = LepTess::new(tessdata, "eng")
        .map_err(|e| anyhow!("failed to initialize tesseract: {:?}", e))?;
    tess.set_variable(Variable::TesseditPagesegMode, PSM_SINGLE_LINE)
        .map_err(|e| anyhow!("failed to set tesseract page segmentation mode: {:?}", e))?;
    Ok(tess)
}

fn read_line(tess: &mut LepTess, image: &GrayImage) -> Result<String> {
    tess.set_image_from_mem(&encode_png(image)?)
        .map_err(|e| anyhow!("tesseract rejected plate image: {:?}", e))?;
    let text = tess
        .get_utf8_text()
        .map_err(|e| anyhow!("tesseract returned invalid utf-8: {}", e))?;
    Ok(text.trim().to_string())
}

fn encode_png(image: &GrayImage) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .context("encode plate crop as png")?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plate_crop_encodes_as_decodable_png() -> Result<()> {
        let crop = GrayImage::from_fn(3, 2, |x, y| image::Luma([(x * 40 + y) as u8]));
        let png = encode_png(&crop)?;
        assert!(png.starts_with(b"\x89PNG"));
        let decoded = image::load_from_memory_with_format(&png, ImageFormat::Png)?.to_luma8();
        assert_eq!(decoded, crop);
        Ok(())
    }
}

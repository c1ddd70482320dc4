use log::debug;
use opencv::core::{CV_32F, Rect, Scalar, Size};
use opencv::prelude::*;
use opencv::{dnn, imgcodecs, imgproc};

use super::{ExtractorConfig, FeatureExtractor, MOBILENET_FEATURE_DIM};
use crate::error::{FvError, Result};

/// 使用 OpenCV DNN 运行去掉分类头的 MobileNetV2 ONNX 模型
pub struct MobileNetExtractor {
    net: dnn::Net,
    config: ExtractorConfig,
}

impl MobileNetExtractor {
    pub fn open(config: ExtractorConfig) -> Result<Self> {
        debug!("加载特征提取模型: {}", config.model.display());
        let net = dnn::read_net_from_onnx(&config.model.to_string_lossy())?;
        if net.empty()? {
            return Err(FvError::Extraction(format!(
                "无法加载模型: {}",
                config.model.display()
            )));
        }
        Ok(Self { net, config })
    }

    /// 解码 -> 短边缩放 -> 中心裁剪 -> NCHW blob -> 按通道标准化
    fn preprocess(&self, bytes: &[u8]) -> Result<Mat> {
        let buf = Mat::from_slice(bytes)?;
        let image = imgcodecs::imdecode(&buf, imgcodecs::IMREAD_COLOR)?;
        if image.empty() {
            return Err(FvError::Extraction("无法解码图片".into()));
        }

        let (w, h) = (image.cols(), image.rows());
        let short = w.min(h);
        let size = self.config.resize as i32;
        let (nw, nh) = if w <= h { (size, h * size / short) } else { (w * size / short, size) };
        let mut resized = Mat::default();
        imgproc::resize(
            &image,
            &mut resized,
            Size::new(nw, nh),
            0.,
            0.,
            imgproc::InterpolationFlags::INTER_LINEAR as i32,
        )?;

        let crop = self.config.crop as i32;
        if nw < crop || nh < crop {
            return Err(FvError::Extraction(format!("图片尺寸过小: {w}x{h}")));
        }
        let x = ((nw - crop) as f32 / 2.).round() as i32;
        let y = ((nh - crop) as f32 / 2.).round() as i32;
        let cropped = Mat::roi(&resized, Rect::new(x, y, crop, crop))?.try_clone()?;

        // 缩放到 [0, 1]，BGR 转为 RGB
        let mut blob = dnn::blob_from_image(
            &cropped,
            1. / 255.,
            Size::new(crop, crop),
            Scalar::default(),
            true,
            false,
            CV_32F,
        )?;

        let plane = (crop * crop) as usize;
        let data = blob.data_typed_mut::<f32>()?;
        for (c, channel) in data.chunks_exact_mut(plane).enumerate() {
            let (mean, std) = (self.config.mean[c], self.config.std[c]);
            channel.iter_mut().for_each(|v| *v = (*v - mean) / std);
        }
        Ok(blob)
    }
}

impl FeatureExtractor for MobileNetExtractor {
    fn dim(&self) -> usize {
        MOBILENET_FEATURE_DIM
    }

    fn extract(&mut self, image: &[u8]) -> Result<Vec<f32>> {
        let blob = self.preprocess(image)?;
        self.net.set_input(&blob, "", 1.0, Scalar::default())?;
        let output = self.net.forward_single("")?;
        let feature = output.data_typed::<f32>()?.to_vec();
        if feature.len() != MOBILENET_FEATURE_DIM {
            return Err(FvError::Extraction(format!(
                "模型输出维数为 {}，应为 {MOBILENET_FEATURE_DIM}",
                feature.len()
            )));
        }
        Ok(feature)
    }
}

//! Thin wrapper over tract for fixed-shape NHWC models

use std::path::Path;

use tract_onnx::prelude::*;
use tracing::info;

use crate::DmsError;

/// Optimized, runnable ONNX graph with a pinned input shape
pub struct OnnxModel {
    plan: TypedRunnableModel<TypedModel>,
    input_shape: [usize; 4],
}

impl OnnxModel {
    /// Load a model and pin its single input to `input_shape` (f32)
    pub fn load(path: &Path, input_shape: [usize; 4]) -> Result<Self, DmsError> {
        info!("Loading ONNX model {} with input {:?}", path.display(), input_shape);
        let load_err = |e: TractError| DmsError::ModelLoad(format!("{}: {}", path.display(), e));

        let mut model = tract_onnx::onnx().model_for_path(path).map_err(load_err)?;
        let shape: TVec<TDim> = input_shape.iter().map(|&d| d.to_dim()).collect();
        model
            .set_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), shape))
            .map_err(load_err)?;
        let plan = model
            .into_optimized()
            .map_err(load_err)?
            .into_runnable()
            .map_err(load_err)?;

        Ok(Self { plan, input_shape })
    }

    /// Run on a row-major NHWC buffer; every output comes back flattened
    pub fn run(&self, data: Vec<f32>) -> Result<Vec<Vec<f32>>, DmsError> {
        let [n, h, w, c] = self.input_shape;
        let input = tract_ndarray::Array4::from_shape_vec((n, h, w, c), data)
            .map_err(|e| DmsError::Inference(format!("input shape: {e}")))?
            .into_tensor();

        let outputs = self
            .plan
            .run(tvec![input.into()])
            .map_err(|e| DmsError::Inference(e.to_string()))?;

        outputs
            .iter()
            .map(|output| {
                output
                    .to_array_view::<f32>()
                    .map(|view| view.iter().copied().collect())
                    .map_err(|e| DmsError::Inference(e.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_load_error() {
        let result = OnnxModel::load(Path::new("/no/such/model.onnx"), [1, 48, 48, 1]);
        assert!(matches!(result, Err(DmsError::ModelLoad(_))));
    }
}

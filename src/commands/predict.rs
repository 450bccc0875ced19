use crate::context::AppContext;
use crate::features;
use crate::predictor::{latest_complete_row, FeatureVector, ModelPair, Prediction};
use anyhow::{anyhow, Context, Result};
use std::path::Path;

pub enum PredictInput {
    /// Fetch the symbol and use its latest row with all inputs defined.
    Symbol(String),
    Features(FeatureVector),
}

pub fn run(
    app: &AppContext,
    model_high: &Path,
    model_low: &Path,
    input: PredictInput,
) -> Result<Prediction> {
    let logger = app.logger();
    let models = ModelPair::load(model_high, model_low)?;
    logger.info(format_args!(
        "Loaded models from {} and {}",
        model_high.display(),
        model_low.display()
    ));

    let vector = match input {
        PredictInput::Features(vector) => vector,
        PredictInput::Symbol(symbol) => {
            let pipeline = app.http_pipeline()?;
            let bars = pipeline
                .retrieve(&symbol, app.settings().start_date)
                .with_context(|| format!("Unable to retrieve bars for {}", symbol))?;
            let table = features::compute(&symbol, &bars, pipeline.windows());
            let row = latest_complete_row(&table, &symbol).ok_or_else(|| {
                anyhow!(
                    "{} has no row with every regression input defined",
                    symbol
                )
            })?;
            logger.info(format_args!(
                "Predicting {} from the row dated {}",
                symbol, row.bar.date
            ));
            FeatureVector::from_row(row)
                .ok_or_else(|| anyhow!("Feature row for {} is incomplete", symbol))?
        }
    };

    let prediction = models.predict(&vector);
    logger.info(format_args!(
        "Predicted % diff from next high: {:.4}, from next low: {:.4}",
        prediction.pct_diff_from_high_next, prediction.pct_diff_from_low_next
    ));
    Ok(prediction)
}

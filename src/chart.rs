use crate::error::ChartError;
use plotters::prelude::*;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Color of the element holding the maximum Y value
pub const HIGHLIGHT: RGBColor = RED;

/// Color of every other element
pub const NEUTRAL: RGBColor = RGBColor(128, 128, 128);

// Cells pandas-style readers treat as missing
const MISSING_MARKERS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// Chart kinds supported by the generator
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChartType {
    /// One bar per row, always on a categorical X axis
    Bar,

    /// Rows joined in file order, with a marker on the maximum
    Line,

    /// One point per row
    Scatter,
}

impl ChartType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Bar => "bar",
            ChartType::Line => "line",
            ChartType::Scatter => "scatter",
        }
    }
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChartType {
    type Err = ChartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bar" => Ok(ChartType::Bar),
            "line" => Ok(ChartType::Line),
            "scatter" => Ok(ChartType::Scatter),
            other => Err(ChartError::InvalidChartType(other.to_string())),
        }
    }
}

/// Styling options for a rendered chart
#[derive(Clone, Debug)]
pub struct ChartOptions {
    /// Title displayed at the top of the chart
    pub title: String,

    /// Label for the X-axis
    pub x_label: String,

    /// Label for the Y-axis
    pub y_label: String,

    /// Width of the image in pixels
    pub width: u32,

    /// Height of the image in pixels
    pub height: u32,

    /// Kind of chart to draw
    pub chart_type: ChartType,
}

impl Default for ChartOptions {
    fn default() -> Self {
        Self {
            title: "Chart".to_string(),
            x_label: "X Axis".to_string(),
            y_label: "Y Axis".to_string(),
            width: 1000,
            height: 600,
            chart_type: ChartType::Bar,
        }
    }
}

/// Cleaned column pair ready for plotting
///
/// Rows with a missing value in either column are already dropped.
#[derive(Debug, Clone)]
pub struct ChartData {
    /// X values as they appear in the file
    pub labels: Vec<String>,

    /// X values parsed as numbers, when every one of them parses
    pub numeric_x: Option<Vec<f64>>,

    /// Y values
    pub ys: Vec<f64>,

    /// Row holding the maximum Y value (first one on ties)
    pub max_index: usize,
}

impl ChartData {
    /// Read `x_column` and `y_column` from the CSV at `path`
    pub fn from_csv(path: &Path, x_column: &str, y_column: &str) -> Result<Self, ChartError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)?;

        let headers = reader.headers()?.clone();
        let rows = reader
            .records()
            .collect::<Result<Vec<csv::StringRecord>, csv::Error>>()?;
        if headers.is_empty() || rows.is_empty() {
            return Err(ChartError::EmptyFile);
        }

        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| ChartError::MissingColumn(name.to_string()))
        };
        let x_index = column(x_column)?;
        let y_index = column(y_column)?;

        // Y must be numeric wherever it is present
        let mut parsed_y = Vec::with_capacity(rows.len());
        for row in &rows {
            let value = row.get(y_index).unwrap_or("").trim();
            if is_missing(value) {
                parsed_y.push(None);
                continue;
            }
            match value.parse::<f64>() {
                Ok(v) if v.is_finite() => parsed_y.push(Some(v)),
                // inf and NaN have no position on the axis; treat as missing
                Ok(_) => parsed_y.push(None),
                Err(_) => return Err(ChartError::NonNumericColumn(y_column.to_string())),
            }
        }

        let mut labels = Vec::new();
        let mut ys = Vec::new();
        for (row, y) in rows.iter().zip(parsed_y) {
            let x = row.get(x_index).unwrap_or("").trim();
            if let (false, Some(y)) = (is_missing(x), y) {
                labels.push(x.to_string());
                ys.push(y);
            }
        }
        if ys.is_empty() {
            return Err(ChartError::NoValidData);
        }

        let numeric_x = labels
            .iter()
            .map(|l| l.parse::<f64>().ok().filter(|v| v.is_finite()))
            .collect::<Option<Vec<f64>>>();

        let mut max_index = 0;
        for (i, y) in ys.iter().enumerate() {
            if *y > ys[max_index] {
                max_index = i;
            }
        }

        Ok(Self {
            labels,
            numeric_x,
            ys,
            max_index,
        })
    }

    pub fn len(&self) -> usize {
        self.ys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ys.is_empty()
    }

    /// Per-element colors: the maximum is highlighted, the rest neutral
    pub fn colors(&self) -> Vec<RGBColor> {
        (0..self.len())
            .map(|i| if i == self.max_index { HIGHLIGHT } else { NEUTRAL })
            .collect()
    }

    fn is_categorical(&self, chart_type: ChartType) -> bool {
        chart_type == ChartType::Bar || self.numeric_x.is_none()
    }

    fn x_at(&self, i: usize, chart_type: ChartType) -> f64 {
        match (&self.numeric_x, self.is_categorical(chart_type)) {
            (Some(xs), false) => xs[i],
            _ => i as f64,
        }
    }

    fn ranges(&self, chart_type: ChartType) -> (std::ops::Range<f64>, std::ops::Range<f64>) {
        let x_range = if self.is_categorical(chart_type) {
            -0.5..self.len() as f64 - 0.5
        } else {
            let xs = (0..self.len()).map(|i| self.x_at(i, chart_type));
            padded(xs)
        };

        let y_range = match chart_type {
            // Bars grow from zero
            ChartType::Bar => padded(self.ys.iter().copied().chain(std::iter::once(0.0))),
            _ => padded(self.ys.iter().copied()),
        };

        (x_range, y_range)
    }
}

fn is_missing(value: &str) -> bool {
    MISSING_MARKERS.contains(&value)
}

fn padded(values: impl Iterator<Item = f64>) -> std::ops::Range<f64> {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    let span = hi - lo;
    if span <= 0.0 {
        lo - 1.0..hi + 1.0
    } else {
        lo - span * 0.05..hi + span * 0.05
    }
}

/// Name of the chart generated from `source` as `chart_type`
///
/// Regenerating the same source and type yields the same name, so the
/// newer image replaces the older one.
pub fn chart_filename(source: &Path, chart_type: ChartType) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "chart".to_string());
    format!("{}_{}.png", stem, chart_type)
}

/// Generate a chart image from two columns of a CSV file
///
/// The PNG is written to `out_dir/{stem}_{chart_type}.png` and its file
/// name is returned.
///
/// # Arguments
/// * `path` - CSV file to read
/// * `x_column` - Column used for the X axis
/// * `y_column` - Numeric column used for the Y axis
/// * `chart_type` - One of `bar`, `line`, `scatter`
/// * `out_dir` - Directory receiving the image, created if needed
///
/// # Errors
/// * Every failure, including unexpected rendering errors, is reported as
///   a [`ChartError`] whose message can be shown to the user
pub fn generate(
    path: &Path,
    x_column: &str,
    y_column: &str,
    chart_type: &str,
    out_dir: &Path,
) -> Result<String, ChartError> {
    let data = ChartData::from_csv(path, x_column, y_column)?;
    let chart_type: ChartType = chart_type.parse()?;

    let basename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let options = ChartOptions {
        title: format!("Chart from {}", basename),
        x_label: x_column.to_string(),
        y_label: y_column.to_string(),
        chart_type,
        ..ChartOptions::default()
    };

    std::fs::create_dir_all(out_dir)?;
    let filename = chart_filename(path, chart_type);
    let target = out_dir.join(&filename);

    if let Err(e) = render(&data, &options, &target, true) {
        // Usually a missing system font; retry without any text
        log::warn!("chart render with labels failed ({}), retrying without text", e);
        render(&data, &options, &target, false).map_err(|_| ChartError::Render(e.to_string()))?;
    }

    log::info!(
        "generated {} from {} ({} rows)",
        filename,
        basename,
        data.len()
    );
    Ok(filename)
}

/// Draw `data` into a PNG at `target`
///
/// # Implementation Notes
/// * Bars always sit on categorical positions `0..n`
/// * Line charts draw the neutral line first, then one highlighted marker
/// * With `with_text` unset no caption, labels or axis descriptions are drawn
fn render(
    data: &ChartData,
    options: &ChartOptions,
    target: &Path,
    with_text: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let root = BitMapBackend::new(target, (options.width, options.height)).into_drawing_area();
    root.fill(&WHITE)?;

    let chart_type = options.chart_type;
    let (x_range, y_range) = data.ranges(chart_type);
    let categorical = data.is_categorical(chart_type);

    let mut builder = ChartBuilder::on(&root);
    builder.margin(20);
    if with_text {
        builder
            .caption(&options.title, ("sans-serif", 28).into_font())
            .x_label_area_size(50)
            .y_label_area_size(70);
    }
    let mut chart = builder.build_cartesian_2d(x_range, y_range)?;

    let labels = &data.labels;
    let category_label = |v: &f64| {
        let i = v.round();
        if (v - i).abs() < 1e-6 && i >= 0.0 && (i as usize) < labels.len() {
            labels[i as usize].clone()
        } else {
            String::new()
        }
    };

    {
        let mut mesh = chart.configure_mesh();
        if with_text {
            mesh.x_desc(options.x_label.as_str())
                .y_desc(options.y_label.as_str());
            if categorical {
                mesh.x_labels(labels.len() + 1)
                    .x_label_formatter(&category_label);
            }
        } else {
            mesh.x_labels(0).y_labels(0);
        }
        mesh.draw()?;
    }

    let colors = data.colors();
    let points: Vec<(f64, f64)> = (0..data.len())
        .map(|i| (data.x_at(i, chart_type), data.ys[i]))
        .collect();

    match chart_type {
        ChartType::Bar => {
            chart.draw_series(points.iter().zip(&colors).map(|(&(x, y), color)| {
                Rectangle::new([(x - 0.4, 0.0), (x + 0.4, y)], color.filled())
            }))?;
        }
        ChartType::Line => {
            chart.draw_series(LineSeries::new(
                points.iter().copied(),
                NEUTRAL.stroke_width(2),
            ))?;
            let peak = points[data.max_index];
            chart.draw_series(std::iter::once(Circle::new(peak, 6, HIGHLIGHT.filled())))?;
        }
        ChartType::Scatter => {
            chart.draw_series(
                points
                    .iter()
                    .zip(&colors)
                    .map(|(&point, color)| Circle::new(point, 5, color.filled())),
            )?;
        }
    }

    root.present()?;
    Ok(())
}

use crate::app::Message;
use plotters::chart::ChartBuilder;
use plotters::series::LineSeries;
use plotters::style::RGBColor;
use plotters_iced::{Chart, DrawingBackend};

/// Margin added above and below the window's extremes
const Y_PADDING: f64 = 0.05;

pub const MOTHER_COLOR: RGBColor = RGBColor(220, 40, 40);
pub const BABY_COLOR: RGBColor = RGBColor(40, 90, 220);

/// Scrolling view of one display window, newest sample at t = 0
pub struct WindowChart<'a> {
    pub caption: &'static str,
    pub values: &'a [f64],
    pub range: (f64, f64),
    pub sample_interval: f64,
    pub color: RGBColor,
}

/// Y-axis bounds for a window, padded so flat signals still get a visible band
pub fn padded_range((min, max): (f64, f64)) -> (f64, f64) {
    if !min.is_finite() || !max.is_finite() {
        return (-Y_PADDING, Y_PADDING);
    }
    (min - Y_PADDING, max + Y_PADDING)
}

/// Seconds relative to the newest sample for each slot
pub fn time_axis(len: usize, sample_interval: f64) -> impl Iterator<Item = f64> {
    (0..len).map(move |i| (i as f64 + 1.0 - len as f64) * sample_interval)
}

impl<'a> Chart<Message> for WindowChart<'a> {
    type State = ();

    fn build_chart<DB: DrawingBackend>(&self, _state: &Self::State, mut builder: ChartBuilder<DB>) {
        let span = (self.values.len().saturating_sub(1) as f64 * self.sample_interval).max(self.sample_interval);
        let (y_min, y_max) = padded_range(self.range);

        let mut chart = match builder
            .margin(15)
            .caption(self.caption, ("sans-serif", 20))
            .x_label_area_size(30)
            .y_label_area_size(40)
            .build_cartesian_2d(-span..0.0, y_min..y_max)
        {
            Ok(chart) => chart,
            Err(e) => {
                log::warn!("Failed to build {} chart: {:?}", self.caption, e);
                return;
            }
        };

        if let Err(e) = chart.plotting_area().fill(&RGBColor(245, 245, 240)) {
            log::warn!("Failed to fill background: {:?}", e);
        }

        if let Err(e) = chart
            .configure_mesh()
            .axis_style(RGBColor(60, 60, 60))
            .x_desc("Time (s)")
            .draw()
        {
            log::warn!("Failed to draw mesh: {:?}", e);
        }

        let points = time_axis(self.values.len(), self.sample_interval)
            .zip(self.values.iter().copied());

        if let Err(e) = chart.draw_series(LineSeries::new(points, &self.color)) {
            log::warn!("Failed to draw {} series: {:?}", self.caption, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_range() {
        assert_eq!(padded_range((0.0, 1.0)), (-0.05, 1.05));
        assert_eq!(padded_range((f64::INFINITY, f64::NEG_INFINITY)), (-0.05, 0.05));
    }

    #[test]
    fn test_time_axis_ends_at_zero() {
        let axis: Vec<f64> = time_axis(4, 0.5).collect();
        assert_eq!(axis, vec![-1.5, -1.0, -0.5, 0.0]);
    }
}

//! Conversions between wire messages and `lab-core` types.

use lab_core::{Sample, SliceArg};

use crate::lab;

impl From<Sample> for lab::Sample {
    fn from(sample: Sample) -> Self {
        lab::Sample {
            timestamp_ns: sample.timestamp_ns,
            tick: sample.tick,
            fields: sample.fields.into_iter().collect(),
        }
    }
}

impl From<lab::Sample> for Sample {
    fn from(sample: lab::Sample) -> Self {
        Sample {
            timestamp_ns: sample.timestamp_ns,
            tick: sample.tick,
            fields: sample.fields.into_iter().collect(),
        }
    }
}

impl From<SliceArg> for lab::Slice {
    fn from(slice: SliceArg) -> Self {
        lab::Slice {
            start: slice.start,
            stop: slice.stop,
            step: slice.step,
        }
    }
}

impl From<lab::Slice> for SliceArg {
    fn from(slice: lab::Slice) -> Self {
        SliceArg {
            start: slice.start,
            stop: slice.stop,
            step: slice.step,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_round_trips_through_wire_form() {
        let sample = Sample::at_tick(7)
            .with_field("voltage", 1.25)
            .with_field("current", 0.05);
        let wire: lab::Sample = sample.clone().into();
        let back: Sample = wire.into();
        assert_eq!(back, sample);
    }

    #[test]
    fn slice_bounds_survive_conversion() {
        let slice = SliceArg {
            start: Some(-10),
            stop: None,
            step: Some(2),
        };
        let wire: lab::Slice = slice.into();
        assert_eq!(wire.start, Some(-10));
        assert_eq!(SliceArg::from(wire), slice);
    }
}

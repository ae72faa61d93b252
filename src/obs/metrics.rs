// self
use crate::obs::{FlowKind, FlowOutcome};

/// Records a flow outcome via the global metrics recorder when the `metrics` feature is on.
pub fn record_flow_outcome(kind: FlowKind, outcome: FlowOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"aws_identity_broker_flow_total",
			"flow" => kind.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, outcome);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn recording_without_recorder_is_silent() {
		record_flow_outcome(FlowKind::DeviceAuthorization, FlowOutcome::Failure);
		record_flow_outcome(FlowKind::Resolve, FlowOutcome::of::<(), ()>(&Ok(())));
	}
}

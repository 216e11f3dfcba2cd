use tracing::Subscriber;
use tracing_subscriber::{
    fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields},
    registry::LookupSpan,
};

/// Writes `LEVEL: {span fields}:: message`, without timestamps or targets
pub(crate) struct Formatter;
impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        writer: &mut dyn std::fmt::Write,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let level = *event.metadata().level();
        write!(writer, "{}: ", level)?;

        ctx.visit_spans(|span| {
            // Span names are skipped, the fields say more
            let ext = span.extensions();
            if let Some(fields) = ext.get::<FormattedFields<N>>() {
                if !fields.is_empty() {
                    write!(writer, "{{{}}}", fields)?;
                }
            }
            write!(writer, ":: ")
        })?;

        ctx.field_format().format_fields(writer, event)?;

        writeln!(writer)
    }
}

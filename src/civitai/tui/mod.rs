/*
 * Copyright (c) 2022 McSib
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::warn;

use crate::civitai::progress::ProgressEvent;

/// Template used while a download is running.
const DOWNLOAD_TEMPLATE: &str = "{spinner:.cyan} [{elapsed_precise}] {prefix:.bold} {msg}";

/// Template used when [DOWNLOAD_TEMPLATE] is rejected.
const FALLBACK_TEMPLATE: &str = "{spinner} {msg}";

/// A builder that helps in making a new [ProgressStyle] for use.
pub(crate) struct ProgressStyleBuilder {
    /// The [ProgressStyle] being built.
    progress_style: ProgressStyle,
}

impl ProgressStyleBuilder {
    /// Sets the template of the progress style, falling back to a plain spinner line when
    /// the template is rejected.
    ///
    /// # Arguments
    ///
    /// * `msg_template`: The template to use.
    pub(crate) fn template(mut self, msg_template: &str) -> Self {
        self.progress_style = match self.progress_style.clone().template(msg_template) {
            Ok(style) => style,
            Err(err) => {
                warn!("Template error with '{}': {}. Using fallback template.", msg_template, err);
                self.progress_style
                    .clone()
                    .template(FALLBACK_TEMPLATE)
                    .unwrap_or_else(|_| ProgressStyle::default_spinner())
            }
        };
        self
    }

    /// Sets the frames the spinner cycles through.
    pub(crate) fn tick_chars(mut self, chars: &str) -> Self {
        self.progress_style = self.progress_style.tick_chars(chars);
        self
    }

    pub(crate) fn build(self) -> ProgressStyle {
        self.progress_style
    }
}

impl Default for ProgressStyleBuilder {
    fn default() -> Self {
        Self {
            progress_style: ProgressStyle::default_spinner(),
        }
    }
}

/// A builder that helps in initializing and configuring a new spinner for use.
pub(crate) struct SpinnerBuilder {
    /// The [ProgressBar] to build.
    progress_bar: ProgressBar,
}

impl SpinnerBuilder {
    pub(crate) fn new() -> Self {
        Self {
            progress_bar: ProgressBar::new_spinner(),
        }
    }

    /// Sets the style of the spinner to the style given.
    pub(crate) fn style(self, progress_style: ProgressStyle) -> Self {
        self.progress_bar.set_style(progress_style);
        self
    }

    /// Sets the draw target (output) of the spinner to the target given.
    pub(crate) fn draw_target(self, target: ProgressDrawTarget) -> Self {
        self.progress_bar.set_draw_target(target);
        self
    }

    /// Sets the text shown before the message.
    pub(crate) fn prefix(self, prefix: impl Into<String>) -> Self {
        self.progress_bar.set_prefix(prefix.into());
        self
    }

    /// Sets the steady tick's duration to the given duration.
    pub(crate) fn steady_tick(self, duration: Duration) -> Self {
        self.progress_bar.enable_steady_tick(duration);
        self
    }

    /// Returns the newly built spinner.
    pub(crate) fn build(self) -> ProgressBar {
        self.progress_bar
    }
}

/// Shows the events of a running download on one spinner line.
pub(crate) struct DownloadSpinner {
    spinner: ProgressBar,
}

impl DownloadSpinner {
    /// Creates the spinner on stderr with `title` as its prefix.
    pub(crate) fn start(title: &str) -> Self {
        let style = ProgressStyleBuilder::default()
            .template(DOWNLOAD_TEMPLATE)
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .build();
        let spinner = SpinnerBuilder::new()
            .style(style)
            .draw_target(ProgressDrawTarget::stderr())
            .prefix(title)
            .steady_tick(Duration::from_millis(100))
            .build();
        Self { spinner }
    }

    /// Updates the spinner for `event`. Lasting events are also printed above the spinner.
    pub(crate) fn show(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::RequestingPage { .. } | ProgressEvent::Waiting { .. } => {}
            _ => self.spinner.println(event.to_string()),
        }
        self.spinner.set_message(event.to_string());
    }

    pub(crate) fn show_message(&self, message: &str) {
        self.spinner.println(message);
        self.spinner.set_message(message.to_string());
    }

    pub(crate) fn finish(&self, message: &str) {
        self.spinner.finish_with_message(message.to_string());
    }
}

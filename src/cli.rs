// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "kexec",
    version,
    about = "Interactive shell sessions in Kubernetes pods",
    long_about = "kexec opens an interactive session to a process running in a Kubernetes pod,\nrelaying the local terminal over the exec WebSocket stream the way `kubectl exec -it` does.\nThe terminal is put in raw mode, window size changes are forwarded, and the terminal\nis restored on every exit path, including signals and connection loss.",
    after_help = "EXAMPLES:\n  Shell in a pod:                 kexec -it my-pod -- /bin/sh\n  Pick a container:               kexec -it -c agent my-pod -- bash\n  Find the pod by label:          kexec -it -l app=aks-agent -n aks-agent -- bash\n  One-shot command:               kexec my-pod -- cat /etc/os-release\n\nExit status is the remote exit code when the pod reports one, 0 on a clean\nsession end and 1 on failure."
)]
pub struct Cli {
    #[arg(help = "Pod name. Found by label selector when omitted")]
    pub pod: Option<String>,

    #[arg(
        last = true,
        required = true,
        num_args = 1..,
        help = "Command and arguments to run in the pod, after `--`"
    )]
    pub command: Vec<String>,

    #[arg(
        short = 'n',
        long,
        help = "Namespace of the pod [default: context namespace, then 'default']"
    )]
    pub namespace: Option<String>,

    #[arg(
        long,
        help = "Path to the kubeconfig file\n[default: config file value, then the first KUBECONFIG entry, then ~/.kube/config]"
    )]
    pub kubeconfig: Option<String>,

    #[arg(long, help = "kubeconfig context to use [default: current-context]")]
    pub context: Option<String>,

    #[arg(short = 'c', long, help = "Container name [default: the pod's default container]")]
    pub container: Option<String>,

    #[arg(
        short = 'l',
        long = "selector",
        help = "Label selector used to find a running pod when POD is omitted\nMay be repeated; pods matching any selector are considered"
    )]
    pub selectors: Vec<String>,

    #[arg(short = 'i', long = "stdin", help = "Pass local stdin to the remote process")]
    pub stdin: bool,

    #[arg(
        short = 't',
        long,
        help = "Allocate a TTY and put the local terminal in raw mode\nIgnored with a warning when stdin is not a terminal"
    )]
    pub tty: bool,

    #[arg(
        short = 'F',
        long = "config",
        help = "Configuration file path\nConfig loading priority:\n  1. This flag's value\n  2. KEXEC_CONFIG environment variable\n  3. Current directory (./kexec.yaml)\n  4. User config (~/.config/kexec/config.yaml)"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        short = 'v',
        long,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    pub verbose: u8,
}

use std::fs::{File, create_dir_all};
use std::io::Read;
use std::path::Path;

use forgenet::backend::{Backend, get_backend, set_backend};
use forgenet::network::Network;
use forgenet::tensor::TensorDesc;
use forgenet::weights::LayerParams;

use flate2::read::GzDecoder;
use reqwest::blocking::get;

const TEST_IMAGES_URL: &str =
    "https://storage.googleapis.com/cvdf-datasets/mnist/t10k-images-idx3-ubyte.gz";
const TEST_LABELS_URL: &str =
    "https://storage.googleapis.com/cvdf-datasets/mnist/t10k-labels-idx1-ubyte.gz";

fn download_and_extract(url: &str, output_path: &str) {
    use std::io::copy;

    let resp = get(url).expect("Failed to fetch URL");

    if !resp.status().is_success() {
        panic!("Failed to download {}: HTTP {}", url, resp.status());
    }

    let mut decoder = GzDecoder::new(resp);
    let mut out = File::create(output_path).expect("Failed to create file");

    copy(&mut decoder, &mut out).expect("Failed to decompress");
}

fn load_images(path: &str) -> Vec<Vec<f32>> {
    let mut f = File::open(path).unwrap();
    let mut buf = vec![];
    f.read_to_end(&mut buf).unwrap();
    assert_eq!(&buf[0..4], &[0, 0, 8, 3]);
    let count = u32::from_be_bytes(buf[4..8].try_into().unwrap()) as usize;
    let rows = u32::from_be_bytes(buf[8..12].try_into().unwrap()) as usize;
    let cols = u32::from_be_bytes(buf[12..16].try_into().unwrap()) as usize;
    let mut images = Vec::with_capacity(count);
    for i in 0..count {
        let start = 16 + i * rows * cols;
        let end = start + rows * cols;
        let img: Vec<f32> = buf[start..end].iter().map(|&b| b as f32 / 255.0).collect();
        images.push(img);
    }
    images
}

fn load_labels(path: &str) -> Vec<u8> {
    let mut f = File::open(path).unwrap();
    let mut buf = vec![];
    f.read_to_end(&mut buf).unwrap();
    assert_eq!(&buf[0..4], &[0, 0, 8, 1]);
    let count = u32::from_be_bytes(buf[4..8].try_into().unwrap()) as usize;
    buf[8..8 + count].to_vec()
}

/// LeNet geometry of the reference digit classifier.
fn load_network(weights_dir: Option<&str>) -> Network {
    match weights_dir {
        Some(dir) => {
            let dir = Path::new(dir);
            let conv1 = LayerParams::load(
                1,
                20,
                5,
                &dir.join("conv1.bin"),
                &dir.join("conv1.bias.bin"),
            )
            .expect("conv1 weights");
            let conv2 = LayerParams::load(
                20,
                50,
                5,
                &dir.join("conv2.bin"),
                &dir.join("conv2.bias.bin"),
            )
            .expect("conv2 weights");
            let ip1 = LayerParams::load(800, 500, 1, &dir.join("ip1.bin"), &dir.join("ip1.bias.bin"))
                .expect("ip1 weights");
            let ip2 = LayerParams::load(500, 10, 1, &dir.join("ip2.bin"), &dir.join("ip2.bias.bin"))
                .expect("ip2 weights");
            Network::lenet(conv1, conv2, ip1, ip2)
        }
        None => {
            println!("No weights directory given; running zero-initialized (shapes only).");
            let zeros = |i: usize, o: usize, k: usize| {
                LayerParams::from_host(i, o, k, vec![0.0; i * o * k * k], vec![0.0; o]).unwrap()
            };
            Network::lenet(zeros(1, 20, 5), zeros(20, 50, 5), zeros(800, 500, 1), zeros(500, 10, 1))
        }
    }
}

fn main() {
    create_dir_all("mnist_data").unwrap();
    if !Path::new("mnist_data/t10k-images-idx3-ubyte").exists() {
        println!("Downloading MNIST test set...");
        download_and_extract(TEST_IMAGES_URL, "mnist_data/t10k-images-idx3-ubyte");
        download_and_extract(TEST_LABELS_URL, "mnist_data/t10k-labels-idx1-ubyte");
    }

    let images = load_images("mnist_data/t10k-images-idx3-ubyte");
    let labels = load_labels("mnist_data/t10k-labels-idx1-ubyte");

    set_backend(Backend::Cpu);
    println!("Current backend: {:#?}", get_backend());

    let weights_dir = std::env::args().nth(1);
    let mut net = load_network(weights_dir.as_deref());

    let mut correct = 0;
    let total = 10;
    for (image, &label) in images.iter().zip(&labels).take(total) {
        let result = net
            .classify(image, TensorDesc::new(1, 1, 28, 28))
            .expect("forward pass");
        let confidence = result.scores[result.label];
        println!(
            "predicted {} (confidence {:.4}), actual {}",
            result.label, confidence, label
        );
        if result.label == label as usize {
            correct += 1;
        }
    }
    println!("{correct}/{total} correct");
}
